//! Bounded in-memory journal of applied and rejected operations.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::operation::OperationKind;
use crate::error::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub kind: OperationKind,
    pub target: String,
    pub success: bool,
    /// Error code and message when the operation was rejected
    #[serde(default)]
    pub error: Option<String>,
}

/// Ring of the most recent operations
#[derive(Debug)]
pub struct Journal {
    entries: VecDeque<JournalEntry>,
    capacity: usize,
    next_seq: u64,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(4096)),
            capacity: capacity.max(1),
            next_seq: 1,
        }
    }

    /// Append an entry, evicting the oldest one when full
    pub fn record(&mut self, kind: OperationKind, target: &str, error: Option<&Error>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(JournalEntry {
            seq: self.next_seq,
            at: Utc::now(),
            kind,
            target: target.to_string(),
            success: error.is_none(),
            error: error.map(|e| format!("{}: {}", e.kind(), e)),
        });
        self.next_seq += 1;
    }

    /// The last `limit` entries, oldest first
    pub fn recent(&self, limit: usize) -> Vec<JournalEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Rebuild tickets and the descriptor handed to the rebuilding replica.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the replica process must replay to catch up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebuildDescriptor {
    pub ticket_id: uuid::Uuid,
    /// Replica being rebuilt
    pub address: String,
    /// Ready replica to copy from
    pub source: String,
    /// Snapshot names to replay, oldest first
    pub snapshot_chain: Vec<String>,
    /// Generation the replica reaches once verified
    pub generation: u64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Report from the replica process once its copy finished
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerifyOutcome {
    Success,
    Failure { reason: String },
}

impl VerifyOutcome {
    /// Build an outcome from an optional failure reason
    pub fn from_failure(failure: Option<String>) -> Self {
        match failure {
            Some(reason) => VerifyOutcome::Failure { reason },
            None => VerifyOutcome::Success,
        }
    }
}

/// One in-flight rebuild handshake
#[derive(Debug, Clone)]
pub struct RebuildTicket {
    pub descriptor: RebuildDescriptor,
    pub issued: Instant,
    pub deadline: Instant,
}

impl RebuildTicket {
    pub fn new(descriptor: RebuildDescriptor, issued: Instant, deadline: Instant) -> Self {
        Self {
            descriptor,
            issued,
            deadline,
        }
    }

    pub fn address(&self) -> &str {
        &self.descriptor.address
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline
    }
}

//! Replica Registry
//!
//! Authoritative mapping from replica address to replica record. The
//! registry itself is plain data; the volume controller serializes access
//! to it, so every method here either applies completely or not at all.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::replica::{Registration, Replica, ReplicaState, ReplicaType};
use crate::error::{Error, Result};

/// Replica registry keyed by address
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicaRegistry {
    replicas: BTreeMap<String, Replica>,
}

impl ReplicaRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from stored records
    pub fn from_records(records: impl IntoIterator<Item = Replica>) -> Self {
        Self {
            replicas: records
                .into_iter()
                .map(|r| (r.address.clone(), r))
                .collect(),
        }
    }

    /// Insert or update a replica from its registration.
    ///
    /// A lower revision than the stored one is rejected with `StaleRevision`
    /// unless the replica is coming back from Failed.
    pub fn register(&mut self, reg: Registration) -> Result<Replica> {
        let Some(existing) = self.replicas.get_mut(&reg.address) else {
            let mut replica = Replica::new(reg.address.clone(), reg.replica_type);
            replica.revision_count = reg.revision_count;
            replica.peer_details = reg.peer_details;
            replica.up_time = reg.up_time;
            if reg.state == ReplicaState::Failed {
                replica.state = ReplicaState::Failed;
                replica.failure_reason = Some("reported failed at registration".to_string());
            }
            tracing::info!(
                "Registered new replica {} ({}, revision {}, {})",
                replica.address, replica.replica_type, replica.revision_count, replica.state
            );
            self.replicas.insert(reg.address, replica.clone());
            return Ok(replica);
        };

        let leaving_failed =
            existing.state == ReplicaState::Failed && reg.state != ReplicaState::Failed;
        if !leaving_failed && reg.revision_count < existing.revision_count {
            return Err(Error::StaleRevision {
                address: reg.address,
                stored: existing.revision_count,
                incoming: reg.revision_count,
            });
        }

        let next = existing.state.apply_report(reg.state).ok_or_else(|| {
            Error::Conflict(format!(
                "replica {} reported {} while {}",
                reg.address, reg.state, existing.state
            ))
        })?;

        // Validation is done; from here on the update always applies.
        if next != existing.state {
            if next == ReplicaState::Failed {
                existing.fail("reported failed by replica")?;
            } else {
                existing.transition(next)?;
            }
        }
        existing.raise_revision(reg.revision_count);
        existing.peer_details = reg.peer_details;
        existing.replica_type = reg.replica_type;
        existing.up_time = reg.up_time;
        existing.updated_at = Utc::now();

        Ok(existing.clone())
    }

    /// Admit a replica that must not already exist
    pub fn insert(&mut self, address: String, replica_type: ReplicaType) -> Result<Replica> {
        if self.replicas.contains_key(&address) {
            return Err(Error::Conflict(format!("replica {} already exists", address)));
        }
        let replica = Replica::new(address.clone(), replica_type);
        self.replicas.insert(address, replica.clone());
        Ok(replica)
    }

    /// Snapshot of all replicas ordered by address
    pub fn list(&self) -> Vec<Replica> {
        self.replicas.values().cloned().collect()
    }

    /// Iterate over replicas ordered by address
    pub fn iter(&self) -> impl Iterator<Item = &Replica> {
        self.replicas.values()
    }

    /// Mutable iteration, ordered by address
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Replica> {
        self.replicas.values_mut()
    }

    /// Look up a replica
    pub fn get(&self, address: &str) -> Result<&Replica> {
        self.replicas
            .get(address)
            .ok_or_else(|| Error::NotFound(format!("replica {}", address)))
    }

    /// Look up a replica for mutation
    pub fn get_mut(&mut self, address: &str) -> Result<&mut Replica> {
        self.replicas
            .get_mut(address)
            .ok_or_else(|| Error::NotFound(format!("replica {}", address)))
    }

    /// Remove a replica and return its last record
    pub fn remove(&mut self, address: &str) -> Result<Replica> {
        self.replicas
            .remove(address)
            .ok_or_else(|| Error::NotFound(format!("replica {}", address)))
    }

    pub fn contains(&self, address: &str) -> bool {
        self.replicas.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.replicas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Addresses in registry order
    pub fn addresses(&self) -> Vec<String> {
        self.replicas.keys().cloned().collect()
    }

    /// Ready replica with the highest revision, lowest address on ties
    pub fn primary(&self) -> Option<&Replica> {
        self.replicas
            .values()
            .filter(|r| r.is_ready())
            .fold(None, |best: Option<&Replica>, r| match best {
                Some(b) if b.revision_count >= r.revision_count => Some(b),
                _ => Some(r),
            })
    }

    pub fn has_ready(&self) -> bool {
        self.replicas.values().any(|r| r.is_ready())
    }
}

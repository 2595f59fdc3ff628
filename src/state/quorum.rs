//! Quorum Policy
//!
//! Pure evaluation of whether enough quorum replicas are Ready to accept writes.

use serde::{Deserialize, Serialize};

use super::replica::Replica;

/// Result of a quorum evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuorumStatus {
    pub satisfied: bool,
    /// Strict majority of the quorum-type replicas
    pub required: usize,
    /// Ready quorum-type replicas
    pub ready: usize,
}

/// Quorum policy over a replica set
pub struct QuorumPolicy;

impl QuorumPolicy {
    /// Evaluate the replica set.
    ///
    /// Non-quorum replicas are ignored. An empty set is never satisfied.
    pub fn evaluate<'a, I>(replicas: I) -> QuorumStatus
    where
        I: IntoIterator<Item = &'a Replica>,
    {
        let (members, ready) = replicas
            .into_iter()
            .filter(|r| r.is_quorum())
            .fold((0usize, 0usize), |(members, ready), r| {
                (members + 1, ready + usize::from(r.is_ready()))
            });

        let required = members / 2 + 1;
        QuorumStatus {
            satisfied: members > 0 && ready >= required,
            required,
            ready,
        }
    }
}

//! Volume record and aggregate state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{QuorumPolicy, QuorumStatus, Replica, ReplicaRegistry, ReplicaState};

/// Aggregate volume state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeState {
    /// Quorate and every replica Ready
    Healthy,
    /// Quorate but some replica is not Ready
    Degraded,
    /// Quorate and at least one replica is mid-handshake
    Rebuilding,
    /// Quorum not satisfied
    Faulted,
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VolumeState::Healthy => write!(f, "HEALTHY"),
            VolumeState::Degraded => write!(f, "DEGRADED"),
            VolumeState::Rebuilding => write!(f, "REBUILDING"),
            VolumeState::Faulted => write!(f, "FAULTED"),
        }
    }
}

impl VolumeState {
    /// Derive the volume state from the registry and its quorum evaluation
    pub fn derive(quorum: &QuorumStatus, registry: &ReplicaRegistry) -> Self {
        if !quorum.satisfied {
            VolumeState::Faulted
        } else if registry.iter().any(|r| r.state.is_mid_rebuild()) {
            VolumeState::Rebuilding
        } else if registry.iter().any(|r| r.state != ReplicaState::Ready) {
            VolumeState::Degraded
        } else {
            VolumeState::Healthy
        }
    }
}

/// A named point in the volume's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    /// Generation the snapshot was taken at
    pub generation: u64,
    /// Ready replica treated as the holder of the snapshot's data
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Volume record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub id: uuid::Uuid,
    pub name: String,
    /// Back-references into the registry, by address only
    pub replicas: BTreeSet<String>,
    /// Data generation of the authoritative history
    pub generation: u64,
    /// Bumped on every committed mutation
    pub revision: u64,
    pub state: VolumeState,
    pub quorum: QuorumStatus,
    /// Snapshot chain, oldest first
    #[serde(default)]
    pub snapshots: Vec<SnapshotRecord>,
    pub updated_at: DateTime<Utc>,
}

impl Volume {
    /// Create a new, empty volume
    pub fn new(name: String) -> Self {
        let quorum = QuorumPolicy::evaluate(&Vec::<Replica>::new());
        Self {
            id: uuid::Uuid::new_v4(),
            name,
            replicas: BTreeSet::new(),
            generation: 0,
            revision: 0,
            state: VolumeState::Faulted,
            quorum,
            snapshots: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Recompute membership, quorum and state from the registry
    pub fn refresh(&mut self, registry: &ReplicaRegistry) {
        self.replicas = registry.addresses().into_iter().collect();
        self.quorum = QuorumPolicy::evaluate(registry.iter());
        let state = VolumeState::derive(&self.quorum, registry);
        if state != self.state {
            tracing::info!("Volume {}: {} -> {}", self.name, self.state, state);
            self.state = state;
        }
    }

    pub fn snapshot(&self, name: &str) -> Option<&SnapshotRecord> {
        self.snapshots.iter().find(|s| s.name == name)
    }

    /// Snapshot names, oldest first
    pub fn snapshot_chain(&self) -> Vec<String> {
        self.snapshots.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{PeerDetails, Registration, ReplicaType};
    use std::time::Duration;

    fn registry_with(states: &[ReplicaState]) -> ReplicaRegistry {
        let mut registry = ReplicaRegistry::new();
        for (i, state) in states.iter().enumerate() {
            let addr = format!("tcp://10.0.0.{}:9502", i + 1);
            registry
                .register(Registration {
                    address: addr.clone(),
                    revision_count: 1,
                    peer_details: PeerDetails::default(),
                    replica_type: ReplicaType::Quorum,
                    up_time: Duration::ZERO,
                    state: ReplicaState::Registering,
                })
                .unwrap();
            registry.get_mut(&addr).unwrap().state = *state;
        }
        registry
    }

    #[test]
    fn test_state_derivation() {
        use ReplicaState::*;

        let cases = [
            (vec![Ready, Ready, Ready], VolumeState::Healthy),
            (vec![Ready, Ready, Failed], VolumeState::Degraded),
            (vec![Ready, Ready, AwaitingRebuild], VolumeState::Degraded),
            (vec![Ready, Ready, Rebuilding], VolumeState::Rebuilding),
            (vec![Ready, Failed, Rebuilding], VolumeState::Faulted),
            (vec![], VolumeState::Faulted),
        ];

        for (states, expected) in cases {
            let registry = registry_with(&states);
            let mut volume = Volume::new("vol1".into());
            volume.refresh(&registry);
            assert_eq!(volume.state, expected, "states {:?}", states);
            assert_eq!(volume.replicas.len(), states.len());
        }
    }
}

//! Replica records and their lifecycle state machine.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Whether a replica counts toward the write majority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaType {
    /// Counted toward the majority required to accept writes
    Quorum,
    /// Carries data but is never counted toward the majority
    NonQuorum,
}

impl std::fmt::Display for ReplicaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaType::Quorum => write!(f, "QUORUM"),
            ReplicaType::NonQuorum => write!(f, "NON_QUORUM"),
        }
    }
}

impl std::str::FromStr for ReplicaType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "quorum" => Ok(ReplicaType::Quorum),
            "nonquorum" | "noquorum" => Ok(ReplicaType::NonQuorum),
            other => Err(Error::Config(format!("unknown replica type '{}'", other))),
        }
    }
}

/// Lifecycle state of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaState {
    /// Replica has announced itself but is not part of the data path yet
    Registering,
    /// Replica must be rebuilt before it can serve
    AwaitingRebuild,
    /// A rebuild ticket has been issued
    PreparingRebuild,
    /// The replica process is copying data
    Rebuilding,
    /// The rebuild result is being checked
    Verifying,
    /// In sync with the volume's authoritative history
    Ready,
    /// Unusable until it registers again or is rebuilt
    Failed,
}

impl std::fmt::Display for ReplicaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicaState::Registering => write!(f, "REGISTERING"),
            ReplicaState::AwaitingRebuild => write!(f, "AWAITING_REBUILD"),
            ReplicaState::PreparingRebuild => write!(f, "PREPARING_REBUILD"),
            ReplicaState::Rebuilding => write!(f, "REBUILDING"),
            ReplicaState::Verifying => write!(f, "VERIFYING"),
            ReplicaState::Ready => write!(f, "READY"),
            ReplicaState::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for ReplicaState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "registering" => Ok(ReplicaState::Registering),
            "awaitingrebuild" => Ok(ReplicaState::AwaitingRebuild),
            "preparingrebuild" => Ok(ReplicaState::PreparingRebuild),
            "rebuilding" => Ok(ReplicaState::Rebuilding),
            "verifying" => Ok(ReplicaState::Verifying),
            "ready" => Ok(ReplicaState::Ready),
            "failed" => Ok(ReplicaState::Failed),
            other => Err(Error::Config(format!("unknown replica state '{}'", other))),
        }
    }
}

impl ReplicaState {
    /// Transition table. Failed is reachable from every other state.
    pub fn can_transition_to(self, next: ReplicaState) -> bool {
        use ReplicaState::*;

        if next == Failed {
            return self != Failed;
        }

        matches!(
            (self, next),
            (Registering, AwaitingRebuild)
                | (Registering, Ready)
                | (AwaitingRebuild, PreparingRebuild)
                | (PreparingRebuild, Rebuilding)
                | (PreparingRebuild, Verifying)
                | (Rebuilding, Verifying)
                | (Verifying, Ready)
                | (Ready, AwaitingRebuild)
                | (Failed, Registering)
                | (Failed, PreparingRebuild)
        )
    }

    /// Replica is somewhere inside the prepare/rebuild/verify handshake
    pub fn is_mid_rebuild(self) -> bool {
        matches!(
            self,
            ReplicaState::PreparingRebuild | ReplicaState::Rebuilding | ReplicaState::Verifying
        )
    }

    /// Resolve the state a replica's self-report leads to.
    ///
    /// Returns `None` when the report contradicts what the controller knows.
    pub fn apply_report(self, reported: ReplicaState) -> Option<ReplicaState> {
        use ReplicaState::*;

        match (self, reported) {
            (Failed, Failed) => Some(Failed),
            (Failed, _) => Some(Registering),
            (_, Failed) => Some(Failed),
            (current, reported) if current == reported => Some(current),
            // A replica that restarts only knows it is up; the controller's view wins.
            (current, Registering) => Some(current),
            (PreparingRebuild, Rebuilding) => Some(Rebuilding),
            _ => None,
        }
    }
}

/// Peer information a replica reports about the volume it belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDetails {
    /// Number of data replicas the replica believes the volume has
    #[serde(default)]
    pub replica_count: u32,
    /// Number of quorum replicas the replica believes the volume has
    #[serde(default)]
    pub quorum_replica_count: u32,
}

/// A single inbound registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub address: String,
    pub revision_count: u64,
    #[serde(default)]
    pub peer_details: PeerDetails,
    pub replica_type: ReplicaType,
    #[serde(default)]
    pub up_time: Duration,
    pub state: ReplicaState,
}

/// Replica record owned by the registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    /// Unique replica address (e.g. tcp://10.0.0.5:9502)
    pub address: String,
    pub replica_type: ReplicaType,
    pub state: ReplicaState,
    /// Data generation held by the replica. Never decreases.
    pub revision_count: u64,
    pub peer_details: PeerDetails,
    pub up_time: Duration,
    /// Why the replica last entered Failed
    #[serde(default)]
    pub failure_reason: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Replica {
    /// Create a new replica record in the Registering state
    pub fn new(address: String, replica_type: ReplicaType) -> Self {
        let now = Utc::now();
        Self {
            address,
            replica_type,
            state: ReplicaState::Registering,
            revision_count: 0,
            peer_details: PeerDetails::default(),
            up_time: Duration::ZERO,
            failure_reason: None,
            registered_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == ReplicaState::Ready
    }

    pub fn is_quorum(&self) -> bool {
        self.replica_type == ReplicaType::Quorum
    }

    /// Move to `next`, rejecting anything the transition table forbids
    pub fn transition(&mut self, next: ReplicaState) -> Result<()> {
        if self.state == next {
            return Ok(());
        }
        if !self.state.can_transition_to(next) {
            return Err(Error::Conflict(format!(
                "replica {} cannot move from {} to {}",
                self.address, self.state, next
            )));
        }
        if self.state == ReplicaState::Failed {
            self.failure_reason = None;
        }
        tracing::debug!("replica {}: {} -> {}", self.address, self.state, next);
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Move to Failed and keep the reason. An already failed replica keeps
    /// the reason it first failed with.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        if self.state == ReplicaState::Failed && self.failure_reason.is_some() {
            return Ok(());
        }
        self.transition(ReplicaState::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    /// Raise the revision count; lower values are ignored
    pub fn raise_revision(&mut self, revision: u64) {
        if revision > self.revision_count {
            self.revision_count = revision;
            self.updated_at = Utc::now();
        }
    }
}

//! Closed set of orchestrated operations.

use serde::{Deserialize, Serialize};

use super::volume::Volume;
use crate::rebuild::{RebuildDescriptor, VerifyOutcome};
use crate::state::Replica;

/// Volume and rebuild actions dispatched by the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Bootstrap the volume from the listed replicas
    Start { replicas: Vec<String> },
    /// Roll the volume back to a named snapshot
    Revert { name: String },
    /// Take a named snapshot (empty name generates one)
    Snapshot { name: String },
    /// Issue a rebuild ticket
    PrepareRebuild { address: String },
    /// Close a rebuild ticket with the replica's report
    VerifyRebuild {
        address: String,
        outcome: VerifyOutcome,
    },
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Operation::Start { .. } => OperationKind::Start,
            Operation::Revert { .. } => OperationKind::Revert,
            Operation::Snapshot { .. } => OperationKind::Snapshot,
            Operation::PrepareRebuild { .. } => OperationKind::PrepareRebuild,
            Operation::VerifyRebuild { .. } => OperationKind::VerifyRebuild,
        }
    }
}

/// Result of a dispatched operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OperationOutput {
    Started(Volume),
    Reverted(Volume),
    SnapshotTaken(String),
    RebuildPrepared(RebuildDescriptor),
    RebuildVerified(Replica),
}

/// Every kind of inbound mutation, as recorded in the journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Register,
    CreateReplica,
    UpdateReplica,
    RemoveReplica,
    Start,
    Revert,
    Snapshot,
    PrepareRebuild,
    VerifyRebuild,
    Expire,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationKind::Register => "register",
            OperationKind::CreateReplica => "create-replica",
            OperationKind::UpdateReplica => "update-replica",
            OperationKind::RemoveReplica => "remove-replica",
            OperationKind::Start => "start",
            OperationKind::Revert => "revert",
            OperationKind::Snapshot => "snapshot",
            OperationKind::PrepareRebuild => "prepare-rebuild",
            OperationKind::VerifyRebuild => "verify-rebuild",
            OperationKind::Expire => "expire",
        };
        write!(f, "{}", name)
    }
}

//! WolfBlock - Replicated Block Volume Controller
//!
//! The control plane of a replicated block-storage volume. WolfBlock tracks
//! the membership and health of each data replica, drives the
//! prepare/verify handshake that brings a new or lagging replica back in
//! sync, and refuses snapshot and revert unless a quorum of replicas is
//! ready.
//!
//! # Architecture
//!
//! A single `VolumeController` owns the replica registry and the rebuild
//! coordinator for one volume behind one lock. Every registration, rebuild
//! report and operator action is applied to a working copy, quorum and
//! volume state are recomputed, the result is written to the volume
//! catalog, and only then does it become visible to readers.
//!
//! # Features
//!
//! - Replica registry with monotonic revision counts
//! - Majority quorum over quorum-type replicas
//! - Rebuild tickets with deadlines and a background expiry sweep
//! - Snapshot chain with quorum-gated snapshot and revert
//! - SQLite-backed volume catalog
//! - HTTP API and an operator CLI

pub mod api;
pub mod catalog;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod rebuild;
pub mod state;

pub use config::WolfBlockConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::ControllerClient;
    pub use crate::config::WolfBlockConfig;
    pub use crate::controller::{Operation, OperationOutput, Volume, VolumeController, VolumeState};
    pub use crate::error::{Error, Result};
    pub use crate::rebuild::{RebuildDescriptor, VerifyOutcome};
    pub use crate::state::{QuorumPolicy, Registration, Replica, ReplicaRegistry, ReplicaState, ReplicaType};
}

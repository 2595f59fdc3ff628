//! Volume Controller Module
//!
//! The volume record, its aggregate state, and the orchestrator that applies
//! registrations and rebuild reports to it.

mod journal;
mod operation;
mod volume;
mod volume_controller;

pub use journal::{Journal, JournalEntry};
pub use operation::{Operation, OperationKind, OperationOutput};
pub use volume::{SnapshotRecord, Volume, VolumeState};
pub use volume_controller::{ControllerConfig, VolumeController};

//! State Management Module
//!
//! Replica records, the registry that owns them, and the quorum policy
//! evaluated over them.

mod quorum;
mod registry;
mod replica;

pub use quorum::{QuorumPolicy, QuorumStatus};
pub use registry::ReplicaRegistry;
pub use replica::{PeerDetails, Registration, Replica, ReplicaState, ReplicaType};

//! Rebuild Module
//!
//! The prepare/verify handshake that brings a new or lagging replica back
//! in sync, and the sweep that expires abandoned tickets.

mod coordinator;
mod reaper;
mod ticket;

pub use coordinator::RebuildCoordinator;
pub use reaper::TicketReaper;
pub use ticket::{RebuildDescriptor, RebuildTicket, VerifyOutcome};

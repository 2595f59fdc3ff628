//! Rebuild Coordinator
//!
//! Drives the prepare -> (external copy) -> verify handshake for each
//! replica. Holds at most one ticket per replica address. All methods take
//! the registry by mutable reference; the caller holds the volume lock.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::Utc;

use super::ticket::{RebuildDescriptor, RebuildTicket, VerifyOutcome};
use crate::controller::Volume;
use crate::error::{Error, Result};
use crate::state::{Replica, ReplicaRegistry, ReplicaState};

/// Outstanding rebuild tickets for one volume
#[derive(Debug, Clone)]
pub struct RebuildCoordinator {
    tickets: BTreeMap<String, RebuildTicket>,
    ticket_ttl: Duration,
}

impl RebuildCoordinator {
    /// Create a coordinator issuing tickets that live for `ticket_ttl`
    pub fn new(ticket_ttl: Duration) -> Self {
        Self {
            tickets: BTreeMap::new(),
            ticket_ttl,
        }
    }

    pub fn ticket_ttl(&self) -> Duration {
        self.ticket_ttl
    }

    /// Issue a ticket for `address` and move it to PreparingRebuild
    pub fn prepare(
        &mut self,
        registry: &mut ReplicaRegistry,
        volume: &Volume,
        address: &str,
        now: Instant,
    ) -> Result<RebuildDescriptor> {
        let replica = registry.get(address)?;

        if let Some(ticket) = self.tickets.get(address) {
            return Err(Error::Conflict(format!(
                "rebuild ticket {} already outstanding for {}",
                ticket.descriptor.ticket_id, address
            )));
        }
        if !replica.state.can_transition_to(ReplicaState::PreparingRebuild) {
            return Err(Error::Conflict(format!(
                "replica {} is {} and cannot be rebuilt",
                address, replica.state
            )));
        }

        let source = registry
            .primary()
            .map(|r| r.address.clone())
            .ok_or_else(|| {
                Error::Conflict(format!("no ready replica to rebuild {} from", address))
            })?;

        let issued_at = Utc::now();
        let out_of_range = || Error::Config(format!("ticket ttl {:?} out of range", self.ticket_ttl));
        let expires_at = chrono::Duration::from_std(self.ticket_ttl)
            .ok()
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or_else(out_of_range)?;
        let deadline = now.checked_add(self.ticket_ttl).ok_or_else(out_of_range)?;
        let descriptor = RebuildDescriptor {
            ticket_id: uuid::Uuid::new_v4(),
            address: address.to_string(),
            source,
            snapshot_chain: volume.snapshot_chain(),
            generation: volume.generation,
            issued_at,
            expires_at,
        };

        registry.get_mut(address)?.transition(ReplicaState::PreparingRebuild)?;
        self.tickets.insert(
            address.to_string(),
            RebuildTicket::new(descriptor.clone(), now, deadline),
        );

        tracing::info!(
            "Issued rebuild ticket {} for {} from {} (generation {}, {} snapshots)",
            descriptor.ticket_id,
            address,
            descriptor.source,
            descriptor.generation,
            descriptor.snapshot_chain.len()
        );
        Ok(descriptor)
    }

    /// Process the replica's verify report and destroy its ticket
    pub fn verify(
        &mut self,
        registry: &mut ReplicaRegistry,
        volume: &Volume,
        address: &str,
        outcome: VerifyOutcome,
    ) -> Result<Replica> {
        let state = registry.get(address)?.state;

        if !self.tickets.contains_key(address) {
            return Err(Error::NoOutstandingTicket(address.to_string()));
        }
        if !state.is_mid_rebuild() {
            return Err(Error::Conflict(format!(
                "replica {} is {} and not rebuilding",
                address, state
            )));
        }

        let replica = registry.get_mut(address)?;
        match outcome {
            VerifyOutcome::Success => {
                replica.transition(ReplicaState::Verifying)?;
                replica.transition(ReplicaState::Ready)?;
                replica.raise_revision(volume.generation);
                tracing::info!(
                    "Replica {} verified at revision {}",
                    address, replica.revision_count
                );
            }
            VerifyOutcome::Failure { reason } => {
                tracing::warn!("Rebuild of {} failed: {}", address, reason);
                replica.fail(reason)?;
            }
        }
        let replica = replica.clone();

        self.tickets.remove(address);
        Ok(replica)
    }

    /// Fail every replica whose ticket passed its deadline and free the slot.
    ///
    /// Returns the addresses that were failed.
    pub fn expire(&mut self, registry: &mut ReplicaRegistry, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .tickets
            .values()
            .filter(|t| t.is_expired(now))
            .map(|t| t.address().to_string())
            .collect();

        for address in &expired {
            let Some(ticket) = self.tickets.remove(address) else {
                continue;
            };
            let reason = Error::Timeout(format!(
                "rebuild ticket {} expired after {:?}",
                ticket.descriptor.ticket_id,
                ticket.deadline.saturating_duration_since(ticket.issued)
            ))
            .to_string();

            match registry.get_mut(address) {
                Ok(replica) => {
                    tracing::warn!("Replica {}: {}", address, reason);
                    if let Err(e) = replica.fail(reason) {
                        tracing::warn!("Could not fail replica {}: {}", address, e);
                    }
                }
                Err(_) => tracing::debug!("Expired ticket for removed replica {}", address),
            }
        }

        expired
    }

    /// Drop the ticket for a replica that left the handshake some other way
    pub fn release(&mut self, address: &str) -> Option<RebuildTicket> {
        let ticket = self.tickets.remove(address);
        if let Some(t) = &ticket {
            tracing::debug!("Released rebuild ticket {} for {}", t.descriptor.ticket_id, address);
        }
        ticket
    }

    pub fn ticket(&self, address: &str) -> Option<&RebuildTicket> {
        self.tickets.get(address)
    }

    pub fn has_ticket(&self, address: &str) -> bool {
        self.tickets.contains_key(address)
    }

    /// Outstanding tickets ordered by address
    pub fn tickets(&self) -> impl Iterator<Item = &RebuildTicket> {
        self.tickets.values()
    }

    pub fn outstanding(&self) -> usize {
        self.tickets.len()
    }
}

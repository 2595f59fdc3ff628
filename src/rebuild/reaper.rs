//! Ticket Reaper
//!
//! Background task that sweeps expired rebuild tickets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::controller::VolumeController;

/// Periodic expiry sweep for one volume controller
pub struct TicketReaper {
    controller: Arc<VolumeController>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl TicketReaper {
    pub fn new(
        controller: Arc<VolumeController>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            controller,
            interval,
            shutdown,
        }
    }

    /// Run the sweep loop on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Sweep until the shutdown token is cancelled
    pub async fn run(self) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::debug!("Ticket reaper running every {:?}", self.interval);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.controller.expire_tickets(Instant::now()).await {
                Ok(expired) if !expired.is_empty() => {
                    tracing::info!("Expired {} rebuild ticket(s): {:?}", expired.len(), expired);
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Ticket sweep failed: {}", e),
            }
        }

        tracing::debug!("Ticket reaper stopped");
    }
}

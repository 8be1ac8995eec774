//! Heartbeat ticker
//!
//! Runs beside the job loop for the lifetime of the agent. Each tick sends
//! the current status; delivery failures are logged and the next tick tries
//! again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::HeartbeatRecord;
use orchestrator_client::OrchestratorApi;

use crate::status::StatusReader;

/// Periodic liveness reporting
pub struct HeartbeatTask {
    api: Arc<dyn OrchestratorApi>,
    worker_id: String,
    status: StatusReader,
    interval: Duration,
}

impl HeartbeatTask {
    pub fn new(api: Arc<dyn OrchestratorApi>, worker_id: String, status: StatusReader, interval: Duration) -> Self {
        Self {
            api,
            worker_id,
            status,
            interval,
        }
    }

    /// Sends heartbeats until `cancel` fires; returns how many were delivered
    pub async fn run(self, cancel: CancellationToken) -> u64 {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sent: u64 = 0;
        let mut attempts: u64 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            attempts += 1;
            let record = HeartbeatRecord::now(self.worker_id.clone(), self.status.get());
            match self.api.heartbeat(&record).await {
                Ok(()) => {
                    sent += 1;
                    debug!(beat = attempts, status = %record.status, "Heartbeat sent");
                }
                Err(e) => warn!(beat = attempts, "Heartbeat failed: {}", e),
            }
        }

        info!("Heartbeat stopped after {} beats ({} delivered)", attempts, sent);
        sent
    }

    /// Runs the ticker on its own task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<u64> {
        tokio::spawn(self.run(cancel))
    }
}

//! Status reporter
//!
//! Pushes each status transition to the orchestrator in order. Pushes are
//! best-effort: a failure is logged and the local status stays as it is.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use common::WorkerStatus;
use orchestrator_client::OrchestratorApi;

/// Spawns the reporter; it exits when the status writer is dropped
pub fn spawn_status_reporter(
    api: Arc<dyn OrchestratorApi>,
    worker_id: String,
    mut updates: mpsc::UnboundedReceiver<WorkerStatus>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(status) = updates.recv().await {
            match api.update_status(&worker_id, status).await {
                Ok(()) => debug!(%status, "Status pushed"),
                Err(e) => warn!(%status, "Failed to push status: {}", e),
            }
        }
        debug!("Status reporter stopped");
    })
}

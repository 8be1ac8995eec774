//! Registration with the orchestrator

use tracing::{error, info, warn};

use common::error::{Error, Result};
use common::{RetryPolicy, WorkerIdentity};
use orchestrator_client::OrchestratorApi;

/// Registers `identity`, retrying with `policy`
///
/// The same identity is sent on every attempt, so a retry never mints a new
/// worker id. The orchestrator's confirmed id is adopted on success. When
/// every attempt fails the last error is returned as `Error::Registration`.
pub async fn register_with_retry(
    api: &dyn OrchestratorApi,
    identity: WorkerIdentity,
    policy: &RetryPolicy,
) -> Result<WorkerIdentity> {
    if let Err(e) = api.health().await {
        warn!("Orchestrator health check failed before registration: {}", e);
    }

    let outcome = policy
        .retry(
            "register",
            |_: &Error| true,
            |attempt| {
                info!(
                    worker_id = %identity.worker_id(),
                    "Registering with orchestrator (attempt {}/{})",
                    attempt,
                    policy.max_attempts
                );
                api.register(&identity)
            },
        )
        .await;

    match outcome {
        Ok(worker_id) => {
            if worker_id != identity.worker_id() {
                info!("Orchestrator assigned worker id {}", worker_id);
            }
            Ok(identity.confirmed(worker_id))
        }
        Err(e) => {
            error!("Failed to register after {} attempts: {}", policy.max_attempts, e);
            Err(match e {
                Error::Registration(_) => e,
                other => Error::Registration(other.to_string()),
            })
        }
    }
}

//! Orchestrator API surface

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use common::error::Result;
use common::{HeartbeatRecord, HostMetadata, Job, WorkerIdentity, WorkerStatus};

/// Body of `POST /api/register`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationRequest {
    /// Id generated locally; the orchestrator may confirm or replace it
    pub worker_id: String,
    pub device_name: String,
    pub ip_address: String,
    /// Labels of the available compute units, e.g. `"CPU (ONNX)"`
    pub capabilities: Vec<String>,
    pub device_info: HostMetadata,
}

impl RegistrationRequest {
    /// Builds the request for `identity`
    pub fn new(identity: &WorkerIdentity, ip_address: impl Into<String>) -> Self {
        Self {
            worker_id: identity.worker_id().to_string(),
            device_name: identity.device_name().to_string(),
            ip_address: ip_address.into(),
            capabilities: identity.available_units().map(|unit| unit.label()).collect(),
            device_info: identity.host().clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RegistrationResponse {
    #[serde(default)]
    pub worker_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusUpdate {
    pub status: WorkerStatus,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobEnvelope {
    pub job: Option<Job>,
}

/// Calls the worker makes to the orchestrator
#[async_trait]
pub trait OrchestratorApi: Send + Sync {
    /// Liveness probe; `Error::Http` when unreachable
    async fn health(&self) -> Result<()>;

    /// Registers `identity` and returns the confirmed worker id
    ///
    /// Fails with `Error::Registration` when the orchestrator is unreachable
    /// or refuses the identity.
    async fn register(&self, identity: &WorkerIdentity) -> Result<String>;

    /// Pushes the current status
    async fn update_status(&self, worker_id: &str, status: WorkerStatus) -> Result<()>;

    /// Sends one heartbeat; failures are `Error::Heartbeat`
    async fn heartbeat(&self, record: &HeartbeatRecord) -> Result<()>;

    /// Looks up a job descriptor by id
    ///
    /// `Error::UnknownJob` when the orchestrator has no such job; `Error::Http`
    /// when it could not answer.
    async fn job_details(&self, job_id: &str) -> Result<Job>;
}

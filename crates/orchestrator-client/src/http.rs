//! HTTP implementation of the orchestrator API

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info, instrument, warn};

use common::error::{Error, Result};
use common::{HeartbeatRecord, Job, WorkerIdentity, WorkerStatus};

use crate::api::{JobEnvelope, OrchestratorApi, RegistrationRequest, RegistrationResponse, StatusUpdate};

/// Orchestrator client over reqwest
#[derive(Clone)]
pub struct HttpOrchestratorClient {
    http_client: Client,
    base_url: Url,
}

impl HttpOrchestratorClient {
    /// Creates a client for the orchestrator at `base_url`
    pub fn new(base_url: &str, connect_timeout: Duration, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| Error::Config(format!("Invalid orchestrator URL {}: {}", base_url, e)))?;

        let http_client = Client::builder()
            .user_agent(concat!("bench-worker/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http_client, base_url })
    }

    /// Orchestrator base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    /// Endpoint URL with each segment percent-encoded
    fn segment_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| Error::Config(format!("Orchestrator URL {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Local address used to reach the orchestrator
    ///
    /// Connecting a UDP socket sends nothing; it only asks the OS to pick the
    /// outbound interface.
    pub async fn local_ip(&self) -> String {
        match self.outbound_addr().await {
            Some(addr) => addr.ip().to_string(),
            None => "127.0.0.1".to_string(),
        }
    }

    async fn outbound_addr(&self) -> Option<SocketAddr> {
        let host = self.base_url.host_str()?.trim_matches(|c| c == '[' || c == ']');
        let port = self.base_url.port_or_known_default()?;
        let target = lookup_host((host, port)).await.ok()?.next()?;

        let bind: SocketAddr = if target.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await.ok()?;
        socket.connect(target).await.ok()?;
        socket.local_addr().ok()
    }
}

/// Status code and body of a non-2xx response
async fn describe_failure(response: Response) -> String {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    format!("{} {}", status, common::utils::truncate_string(body.trim(), 200))
}

#[async_trait]
impl OrchestratorApi for HttpOrchestratorClient {
    async fn health(&self) -> Result<()> {
        let url = self.endpoint("/api/health");
        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Orchestrator unreachable at {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!("Health check failed: {}", describe_failure(response).await)));
        }
        Ok(())
    }

    #[instrument(skip(self, identity), fields(worker_id = %identity.worker_id()))]
    async fn register(&self, identity: &WorkerIdentity) -> Result<String> {
        let url = self.endpoint("/api/register");
        let payload = RegistrationRequest::new(identity, self.local_ip().await);

        debug!("Sending registration request to {}", url);

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::Registration(format!("Failed to send registration request: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Registration(format!(
                "Registration failed with status {}",
                describe_failure(response).await
            )));
        }

        let body: RegistrationResponse = response
            .json()
            .await
            .map_err(|e| Error::Registration(format!("Malformed registration response: {}", e)))?;

        let worker_id = body
            .worker_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| identity.worker_id().to_string());

        info!(
            capabilities = %payload.capabilities.join(", "),
            "Registered with orchestrator as {}",
            worker_id
        );
        Ok(worker_id)
    }

    async fn update_status(&self, worker_id: &str, status: WorkerStatus) -> Result<()> {
        let url = self.segment_url(&["api", "workers", worker_id, "status"])?;
        let response = self
            .http_client
            .put(url)
            .json(&StatusUpdate { status })
            .send()
            .await
            .map_err(|e| Error::Http(format!("Status update failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!("Status update rejected: {}", describe_failure(response).await)));
        }
        debug!(%status, "Status reported");
        Ok(())
    }

    async fn heartbeat(&self, record: &HeartbeatRecord) -> Result<()> {
        let url = self.segment_url(&["api", "workers", &record.worker_id, "heartbeat"])?;
        let response = self
            .http_client
            .post(url)
            .json(record)
            .send()
            .await
            .map_err(|e| Error::Heartbeat(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Heartbeat(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn job_details(&self, job_id: &str) -> Result<Job> {
        let url = self.segment_url(&["api", "jobs", job_id])?;
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Http(format!("Job lookup failed: {}", e)))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::UnknownJob(job_id.to_string()));
        }
        if !response.status().is_success() {
            let failure = describe_failure(response).await;
            warn!(job_id, "Job lookup failed: {}", failure);
            return Err(Error::Http(format!("Job {} lookup failed: {}", job_id, failure)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(format!("Job lookup for {} was cut short: {}", job_id, e)))?;
        let envelope: JobEnvelope = serde_json::from_str(&body)?;

        envelope.job.ok_or_else(|| Error::UnknownJob(job_id.to_string()))
    }
}

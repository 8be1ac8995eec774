//! Redis broker
//!
//! Job queues are Redis lists filled with `LPUSH` by the orchestrator and
//! consumed from the right. A claim is a single `RPOPLPUSH` into the worker's
//! processing list, so an entry is never held only in this process's memory.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use common::error::{Error, Result};
use common::JobResult;
use worker_config::RedisSettings;

use crate::broker::{Claim, JobBroker, QueueLayout};

/// Pause between rounds of polling when every queue is empty
const POLL_STEP: Duration = Duration::from_millis(100);

/// Broker backed by Redis lists
pub struct RedisBroker {
    client: Client,
    address: String,
    /// Established on first use
    connection: Mutex<Option<ConnectionManager>>,
    results_queue: String,
}

impl RedisBroker {
    /// Creates a broker; no connection is made until the first command
    pub fn new(settings: &RedisSettings) -> Result<Self> {
        let client = Client::open(settings.url())
            .map_err(|e| Error::Config(format!("Invalid Redis address {}: {}", settings.url(), e)))?;

        Ok(Self {
            client,
            address: format!("{}:{}", settings.host, settings.port),
            connection: Mutex::new(None),
            results_queue: settings.results_queue.clone(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            return Ok(connection.clone());
        }

        let connection = ConnectionManager::new(self.client.clone())
            .await
            .map_err(broker_error("connect"))?;
        info!("Connected to Redis at {}", self.address);
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn pop_into(&self, queue: &str, list: &str) -> Result<Option<String>> {
        let mut connection = self.connection().await?;
        redis::cmd("RPOPLPUSH")
            .arg(queue)
            .arg(list)
            .query_async::<_, Option<String>>(&mut connection)
            .await
            .map_err(broker_error("RPOPLPUSH"))
    }
}

fn broker_error(command: &'static str) -> impl Fn(RedisError) -> Error {
    move |e| Error::Broker(format!("{} failed: {}", command, e))
}

#[async_trait]
impl JobBroker for RedisBroker {
    async fn claim(&self, layout: &QueueLayout, timeout: Duration) -> Result<Option<Claim>> {
        let deadline = Instant::now() + timeout;
        loop {
            for queue in layout.queues() {
                if let Some(entry) = self.pop_into(queue, layout.processing_list()).await? {
                    debug!(queue = %queue, "Claimed entry");
                    return Ok(Some(layout.claim(entry, queue)));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn ack(&self, claim: &Claim) -> Result<()> {
        let mut connection = self.connection().await?;
        redis::cmd("LREM")
            .arg(&claim.processing_list)
            .arg(1)
            .arg(&claim.entry)
            .query_async::<_, i64>(&mut connection)
            .await
            .map_err(broker_error("LREM"))?;
        Ok(())
    }

    async fn requeue(&self, claim: &Claim) -> Result<()> {
        let mut connection = self.connection().await?;
        redis::pipe()
            .atomic()
            .cmd("LREM")
            .arg(&claim.processing_list)
            .arg(1)
            .arg(&claim.entry)
            .ignore()
            .cmd("RPUSH")
            .arg(&claim.source_queue)
            .arg(&claim.entry)
            .ignore()
            .query_async::<_, ()>(&mut connection)
            .await
            .map_err(broker_error("requeue"))?;
        info!(queue = %claim.source_queue, "Requeued entry");
        Ok(())
    }

    async fn publish_result(&self, result: &JobResult) -> Result<()> {
        let payload = serde_json::to_string(result)?;
        let mut connection = self.connection().await?;
        redis::cmd("LPUSH")
            .arg(&self.results_queue)
            .arg(payload)
            .query_async::<_, i64>(&mut connection)
            .await
            .map_err(broker_error("LPUSH"))?;
        debug!(job_id = %result.job_id, queue = %self.results_queue, "Published result");
        Ok(())
    }

    async fn recover_in_flight(&self, layout: &QueueLayout) -> Result<usize> {
        let mut recovered = 0;
        while self
            .pop_into(layout.processing_list(), layout.personal_queue())
            .await?
            .is_some()
        {
            recovered += 1;
        }
        if recovered > 0 {
            info!(recovered, "Requeued entries left from a previous run");
        }
        Ok(recovered)
    }

    async fn ping(&self) -> Result<()> {
        let mut connection = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut connection)
            .await
            .map_err(broker_error("PING"))?;
        Ok(())
    }
}

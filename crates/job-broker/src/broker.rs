//! Broker trait and queue naming

use std::time::Duration;

use async_trait::async_trait;

use common::error::Result;
use common::{JobResult, WorkerIdentity};

/// Prefix shared by every job queue
pub const JOB_QUEUE_PREFIX: &str = "jobs";

/// A queue entry this worker has taken responsibility for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    /// Raw queue entry: a JSON job descriptor or a bare job id
    pub entry: String,
    /// Queue the entry was taken from
    pub source_queue: String,
    /// Processing list holding the entry until ack or requeue
    pub processing_list: String,
}

/// Queue names a worker consumes, in priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueLayout {
    queues: Vec<String>,
    processing_list: String,
}

impl QueueLayout {
    /// Personal queue first, then one queue per available compute unit
    ///
    /// The processing list is keyed by the device rather than the worker id,
    /// so a restarted worker finds what its previous process left behind.
    pub fn for_worker(identity: &WorkerIdentity, processing_prefix: &str) -> Self {
        let worker_id = identity.worker_id();
        let mut queues = vec![personal_queue(worker_id)];
        queues.extend(
            identity
                .available_units()
                .map(|unit| format!("{}:capability:{}", JOB_QUEUE_PREFIX, unit.target.normalized())),
        );
        queues.dedup();

        Self {
            queues,
            processing_list: format!("{}:{}", processing_prefix, identity.device_key()),
        }
    }

    /// Queues to poll, highest priority first
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Queue addressed to this worker only
    pub fn personal_queue(&self) -> &str {
        &self.queues[0]
    }

    /// List holding claimed, unacknowledged entries
    pub fn processing_list(&self) -> &str {
        &self.processing_list
    }

    pub(crate) fn claim(&self, entry: String, source_queue: &str) -> Claim {
        Claim {
            entry,
            source_queue: source_queue.to_string(),
            processing_list: self.processing_list.clone(),
        }
    }
}

fn personal_queue(worker_id: &str) -> String {
    format!("{}:{}", JOB_QUEUE_PREFIX, worker_id)
}

/// Queue client used by the job loop
///
/// Every call is independent; implementations reconnect on demand so a
/// broker outage surfaces as `Error::Broker` and the caller decides how long
/// to back off.
#[async_trait]
pub trait JobBroker: Send + Sync {
    /// Takes the next entry from the highest-priority non-empty queue
    ///
    /// Waits up to `timeout` when every queue is empty; an empty poll is
    /// `Ok(None)`.
    async fn claim(&self, layout: &QueueLayout, timeout: Duration) -> Result<Option<Claim>>;

    /// Removes a claimed entry from the processing list
    async fn ack(&self, claim: &Claim) -> Result<()>;

    /// Returns a claimed entry to the head of its source queue
    async fn requeue(&self, claim: &Claim) -> Result<()>;

    /// Pushes a result payload to the results queue
    async fn publish_result(&self, result: &JobResult) -> Result<()>;

    /// Moves entries left in the processing list back to the personal queue
    async fn recover_in_flight(&self, layout: &QueueLayout) -> Result<usize>;

    /// Checks that the broker is reachable
    async fn ping(&self) -> Result<()>;
}

//! In-process broker
//!
//! Holds queues in memory with the same claim/ack/requeue semantics as the
//! Redis broker. Used by tests and by local dry runs without a Redis server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use common::error::{Error, Result};
use common::JobResult;

use crate::broker::{Claim, JobBroker, QueueLayout};

#[derive(Default)]
struct State {
    /// Lists by name; entries are claimed from the front
    lists: HashMap<String, VecDeque<String>>,
    results: Vec<JobResult>,
    /// Longest each processing list has been
    peaks: HashMap<String, usize>,
}

/// Broker backed by in-process queues
#[derive(Default)]
pub struct InMemoryBroker {
    state: Mutex<State>,
    pushed: Notify,
    /// Simulates an unreachable broker
    offline: AtomicBool,
    /// Number of upcoming publishes to reject
    failing_publishes: AtomicUsize,
    /// Number of upcoming acknowledgements to reject
    failing_acks: AtomicUsize,
}

impl InMemoryBroker {
    /// Creates an empty broker
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry to the back of `queue`
    pub fn push(&self, queue: &str, entry: impl Into<String>) {
        self.state
            .lock()
            .lists
            .entry(queue.to_string())
            .or_default()
            .push_back(entry.into());
        self.pushed.notify_one();
    }

    /// Entries currently in `list`, front first
    pub fn entries(&self, list: &str) -> Vec<String> {
        self.state
            .lock()
            .lists
            .get(list)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Results published so far
    pub fn results(&self) -> Vec<JobResult> {
        self.state.lock().results.clone()
    }

    /// Makes every call fail with `Error::Broker` while set
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Rejects the next `count` publishes
    pub fn fail_next_publishes(&self, count: usize) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    /// Rejects the next `count` acknowledgements
    pub fn fail_next_acks(&self, count: usize) {
        self.failing_acks.store(count, Ordering::SeqCst);
    }

    /// Most entries `list` ever held at once
    pub fn peak_in_flight(&self, list: &str) -> usize {
        self.state.lock().peaks.get(list).copied().unwrap_or(0)
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::Broker("broker is offline".to_string()));
        }
        Ok(())
    }

    fn try_claim(&self, layout: &QueueLayout) -> Option<Claim> {
        let mut state = self.state.lock();
        for queue in layout.queues() {
            let entry = state.lists.get_mut(queue).and_then(|entries| entries.pop_front());
            if let Some(entry) = entry {
                let in_flight = state.lists.entry(layout.processing_list().to_string()).or_default();
                in_flight.push_back(entry.clone());
                let len = in_flight.len();
                let peak = state.peaks.entry(layout.processing_list().to_string()).or_default();
                *peak = (*peak).max(len);
                return Some(layout.claim(entry, queue));
            }
        }
        None
    }

    fn remove_in_flight(state: &mut State, claim: &Claim) -> bool {
        let Some(list) = state.lists.get_mut(&claim.processing_list) else {
            return false;
        };
        match list.iter().position(|entry| *entry == claim.entry) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl JobBroker for InMemoryBroker {
    async fn claim(&self, layout: &QueueLayout, timeout: Duration) -> Result<Option<Claim>> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_online()?;
            if let Some(claim) = self.try_claim(layout) {
                debug!(queue = %claim.source_queue, "Claimed entry");
                return Ok(Some(claim));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout(deadline - now, self.pushed.notified()).await;
        }
    }

    async fn ack(&self, claim: &Claim) -> Result<()> {
        self.check_online()?;
        if Self::take_failure(&self.failing_acks) {
            return Err(Error::Broker("ack rejected".to_string()));
        }
        Self::remove_in_flight(&mut self.state.lock(), claim);
        Ok(())
    }

    async fn requeue(&self, claim: &Claim) -> Result<()> {
        self.check_online()?;
        {
            let mut state = self.state.lock();
            Self::remove_in_flight(&mut state, claim);
            state
                .lists
                .entry(claim.source_queue.clone())
                .or_default()
                .push_front(claim.entry.clone());
        }
        self.pushed.notify_one();
        Ok(())
    }

    async fn publish_result(&self, result: &JobResult) -> Result<()> {
        self.check_online()?;
        if Self::take_failure(&self.failing_publishes) {
            return Err(Error::Broker("publish rejected".to_string()));
        }
        self.state.lock().results.push(result.clone());
        Ok(())
    }

    async fn recover_in_flight(&self, layout: &QueueLayout) -> Result<usize> {
        self.check_online()?;
        let mut state = self.state.lock();
        let stranded = state
            .lists
            .remove(layout.processing_list())
            .unwrap_or_default();
        let count = stranded.len();
        state
            .lists
            .entry(layout.personal_queue().to_string())
            .or_default()
            .extend(stranded);
        Ok(count)
    }

    async fn ping(&self) -> Result<()> {
        self.check_online()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ComputeDevice, ComputeUnit, EngineKind, HostMetadata, WorkerIdentity};

    fn layout() -> QueueLayout {
        let identity = WorkerIdentity::new(
            "box",
            vec![ComputeUnit::new(ComputeDevice::Cpu, EngineKind::Onnx, true)],
            HostMetadata::default(),
        )
        .confirmed("w1");
        QueueLayout::for_worker(&identity, "jobs:processing")
    }

    #[tokio::test]
    async fn test_personal_queue_has_priority() {
        let broker = InMemoryBroker::new();
        let layout = layout();
        broker.push("jobs:capability:cpu_onnx", "shared");
        broker.push("jobs:w1", "mine");

        let claim = broker.claim(&layout, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(claim.entry, "mine");
        assert_eq!(claim.source_queue, "jobs:w1");
        assert_eq!(broker.entries("jobs:processing:w1"), vec!["mine"]);
    }

    #[tokio::test]
    async fn test_empty_poll_times_out() {
        let broker = InMemoryBroker::new();
        let claim = broker.claim(&layout(), Duration::from_millis(20)).await.unwrap();
        assert!(claim.is_none());
    }

    #[tokio::test]
    async fn test_claim_wakes_on_push() {
        let broker = std::sync::Arc::new(InMemoryBroker::new());
        let layout = layout();

        let pusher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pusher.push("jobs:capability:cpu_onnx", "late");
        });

        let claim = broker.claim(&layout, Duration::from_secs(5)).await.unwrap();
        assert_eq!(claim.unwrap().entry, "late");
    }

    #[tokio::test]
    async fn test_ack_and_requeue() {
        let broker = InMemoryBroker::new();
        let layout = layout();
        broker.push("jobs:capability:cpu_onnx", "a");
        broker.push("jobs:capability:cpu_onnx", "b");

        let a = broker.claim(&layout, Duration::ZERO).await.unwrap().unwrap();
        broker.requeue(&a).await.unwrap();
        assert_eq!(broker.entries("jobs:capability:cpu_onnx"), vec!["a", "b"]);
        assert!(broker.entries("jobs:processing:w1").is_empty());

        let a = broker.claim(&layout, Duration::ZERO).await.unwrap().unwrap();
        broker.fail_next_acks(1);
        assert!(broker.ack(&a).await.unwrap_err().is_broker());
        assert_eq!(broker.entries("jobs:processing:w1"), vec!["a"]);
        broker.ack(&a).await.unwrap();
        assert!(broker.entries("jobs:processing:w1").is_empty());
        assert_eq!(broker.entries("jobs:capability:cpu_onnx"), vec!["b"]);
        assert_eq!(broker.peak_in_flight("jobs:processing:w1"), 1);
    }

    #[tokio::test]
    async fn test_recover_in_flight() {
        let broker = InMemoryBroker::new();
        let layout = layout();
        broker.push("jobs:processing:w1", "stranded-1");
        broker.push("jobs:processing:w1", "stranded-2");
        broker.push("jobs:w1", "queued");

        assert_eq!(broker.recover_in_flight(&layout).await.unwrap(), 2);
        assert_eq!(broker.entries("jobs:w1"), vec!["queued", "stranded-1", "stranded-2"]);
        assert!(broker.entries("jobs:processing:w1").is_empty());
    }

    #[tokio::test]
    async fn test_restarted_worker_recovers_previous_claim() {
        let host = HostMetadata {
            udid: "machine-1".into(),
            ..HostMetadata::default()
        };
        let units = vec![ComputeUnit::new(ComputeDevice::Cpu, EngineKind::Onnx, true)];
        let first = QueueLayout::for_worker(&WorkerIdentity::new("box", units.clone(), host.clone()), "jobs:processing");
        let second = QueueLayout::for_worker(&WorkerIdentity::new("box", units, host), "jobs:processing");

        let broker = InMemoryBroker::new();
        broker.push("jobs:capability:cpu_onnx", "job-7");
        broker.claim(&first, Duration::ZERO).await.unwrap().unwrap();
        // the first process dies here without ack or requeue

        assert_eq!(broker.recover_in_flight(&second).await.unwrap(), 1);
        let claim = broker.claim(&second, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(claim.entry, "job-7");
        assert_eq!(claim.source_queue, second.personal_queue());
    }

    #[tokio::test]
    async fn test_offline_broker() {
        let broker = InMemoryBroker::new();
        broker.set_offline(true);
        assert!(broker.ping().await.unwrap_err().is_broker());
        assert!(broker.claim(&layout(), Duration::ZERO).await.is_err());

        broker.set_offline(false);
        broker.ping().await.unwrap();
    }
}

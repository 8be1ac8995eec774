//! Worker agent
//!
//! One job at a time: claim, mark busy, resolve the target compute unit,
//! load, benchmark, publish, acknowledge, then clean up and return to
//! active. Job-scoped failures become failed or rejected results; only an
//! invalid status transition stops the loop.
//!
//! A claim is always settled (acknowledged or returned to its queue) before
//! the next one is taken. While the broker refuses the settling command the
//! worker stays busy and keeps retrying until shutdown.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use common::error::{Error, Result};
use common::{ComputeDevice, Job, JobResult, PartialMetrics, ResultStatus, RetryPolicy, WorkerIdentity, WorkerStatus};
use job_broker::{Claim, JobBroker, QueueLayout};
use model_manager::{ModelHandle, ModelLoader};
use orchestrator_client::OrchestratorApi;
use performance_monitor::{probe_for, BenchmarkEngine, GpuProbe};
use worker_config::WorkerConfig;

use crate::heartbeat::HeartbeatTask;
use crate::job::{decode_entry, placeholder_job, Entry};
use crate::registration::register_with_retry;
use crate::reporter::spawn_status_reporter;
use crate::status::{status_channel, StatusWriter};

/// Timing and retry settings of the agent
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub heartbeat_interval: Duration,
    /// Longest single broker poll
    pub poll_timeout: Duration,
    /// Used when a descriptor asks for zero runs
    pub default_run_count: u32,
    pub processing_prefix: String,
    pub registration_retry: RetryPolicy,
    pub broker_retry: RetryPolicy,
}

impl From<&WorkerConfig> for AgentSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            poll_timeout: config.poll_timeout(),
            default_run_count: config.default_run_count,
            processing_prefix: config.redis.processing_prefix.clone(),
            registration_retry: config.registration_retry.clone(),
            broker_retry: config.broker_retry.clone(),
        }
    }
}

/// Totals reported when the agent stops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReport {
    pub worker_id: String,
    pub completed: usize,
    pub failed: usize,
    pub rejected: usize,
    /// Jobs handed back to the queue unfinished
    pub requeued: usize,
    /// Results that could not be published; their jobs went back to the
    /// queue to run again
    pub unpublished: usize,
    pub heartbeats: u64,
}

/// What to do with a claimed entry once execution is over
enum Disposition {
    Publish(JobResult),
    /// Shutdown interrupted the job
    Requeue,
    /// The descriptor could not be fetched yet
    Defer,
}

/// How a processed claim ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Done,
    /// Returned to the queue; hold off before claiming again
    Deferred,
}

fn next_pause(backoff: &mut ExponentialBackoff) -> Duration {
    backoff.next_backoff().unwrap_or(backoff.max_interval)
}

/// Chooses the GPU probe for the device a job runs on
pub type GpuProbeFactory = Arc<dyn Fn(ComputeDevice) -> Arc<dyn GpuProbe> + Send + Sync>;

/// The worker runtime
pub struct WorkerAgent {
    settings: AgentSettings,
    api: Arc<dyn OrchestratorApi>,
    broker: Arc<dyn JobBroker>,
    loader: Arc<ModelLoader>,
    benchmark: Arc<BenchmarkEngine>,
    gpu_probe: GpuProbeFactory,
}

impl WorkerAgent {
    /// Creates an agent from its collaborators
    pub fn new(
        settings: AgentSettings,
        api: Arc<dyn OrchestratorApi>,
        broker: Arc<dyn JobBroker>,
        loader: Arc<ModelLoader>,
        benchmark: Arc<BenchmarkEngine>,
    ) -> Self {
        Self {
            settings,
            api,
            broker,
            loader,
            benchmark,
            gpu_probe: Arc::new(probe_for),
        }
    }

    /// Uses a different GPU probe selection
    pub fn with_gpu_probe(mut self, factory: GpuProbeFactory) -> Self {
        self.gpu_probe = factory;
        self
    }

    /// Registers `identity` and serves jobs until `cancel` fires
    ///
    /// Returns an error only for fatal conditions: registration exhausted
    /// its retries, or the status machine was driven into `faulty`.
    pub async fn run(&self, identity: WorkerIdentity, cancel: CancellationToken) -> Result<AgentReport> {
        let identity = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::Interrupted("shutdown requested before registration".to_string()));
            }
            registered = register_with_retry(self.api.as_ref(), identity, &self.settings.registration_retry) => registered?,
        };
        self.serve(identity, cancel).await
    }

    /// Serves jobs for an already registered identity
    pub async fn serve(&self, identity: WorkerIdentity, cancel: CancellationToken) -> Result<AgentReport> {
        let worker_id = identity.worker_id().to_string();
        let (mut status, reader, updates) = status_channel(WorkerStatus::Active);
        let reporter = spawn_status_reporter(self.api.clone(), worker_id.clone(), updates);

        let heartbeat_stop = cancel.child_token();
        let heartbeat = HeartbeatTask::new(
            self.api.clone(),
            worker_id.clone(),
            reader,
            self.settings.heartbeat_interval,
        )
        .spawn(heartbeat_stop.clone());

        let layout = QueueLayout::for_worker(&identity, &self.settings.processing_prefix);
        info!(
            worker_id = %worker_id,
            queues = %layout.queues().join(", "),
            "Worker ready"
        );

        match self.broker.recover_in_flight(&layout).await {
            Ok(0) => {}
            Ok(recovered) => info!("Recovered {} unacknowledged jobs", recovered),
            Err(e) => warn!("Could not recover unacknowledged jobs: {}", e),
        }

        let mut report = AgentReport {
            worker_id,
            ..AgentReport::default()
        };
        let outcome = self.job_loop(&identity, &layout, &mut status, &cancel, &mut report).await;

        heartbeat_stop.cancel();
        drop(status);
        report.heartbeats = heartbeat.await.unwrap_or(0);
        let _ = reporter.await;

        info!(
            completed = report.completed,
            failed = report.failed,
            rejected = report.rejected,
            requeued = report.requeued,
            "Worker stopped"
        );
        outcome.map(|()| report)
    }

    async fn job_loop(
        &self,
        identity: &WorkerIdentity,
        layout: &QueueLayout,
        status: &mut StatusWriter,
        cancel: &CancellationToken,
        report: &mut AgentReport,
    ) -> Result<()> {
        let mut broker_failures: u32 = 0;
        let mut outage = self.settings.broker_retry.backoff();
        let mut lookup = self.settings.broker_retry.backoff();

        while !cancel.is_cancelled() && status.get() != WorkerStatus::Faulty {
            let claim = match self.broker.claim(layout, self.settings.poll_timeout).await {
                Ok(Some(claim)) => {
                    broker_failures = 0;
                    outage.reset();
                    claim
                }
                Ok(None) => {
                    broker_failures = 0;
                    outage.reset();
                    continue;
                }
                Err(e) => {
                    broker_failures = broker_failures.saturating_add(1);
                    let delay = next_pause(&mut outage);
                    warn!(
                        attempt = broker_failures,
                        delay_ms = delay.as_millis() as u64,
                        "Job broker unavailable: {}",
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    continue;
                }
            };

            if cancel.is_cancelled() {
                self.return_claim(&claim, cancel).await;
                report.requeued += 1;
                break;
            }

            match self.process(claim, identity, status, cancel, report).await {
                Ok(Settled::Done) => lookup.reset(),
                Ok(Settled::Deferred) => {
                    let delay = next_pause(&mut lookup);
                    debug!(delay_ms = delay.as_millis() as u64, "Pausing before the next claim");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => {
                    status.fault();
                    error!("Stopping job loop: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// Runs one claimed entry through busy, cleanup and back to active
    async fn process(
        &self,
        claim: Claim,
        identity: &WorkerIdentity,
        status: &mut StatusWriter,
        cancel: &CancellationToken,
        report: &mut AgentReport,
    ) -> Result<Settled> {
        status.transition(WorkerStatus::Busy)?;

        let span = info_span!("job", queue = %claim.source_queue);
        let (disposition, mut handle) = self.execute(&claim, identity, cancel).instrument(span).await;

        let settled = match disposition {
            Disposition::Publish(result) => {
                if self.publish_and_ack(&claim, &result, cancel).await {
                    match result.status {
                        ResultStatus::Complete => report.completed += 1,
                        ResultStatus::Failed => report.failed += 1,
                        ResultStatus::Rejected => report.rejected += 1,
                    }
                } else {
                    report.unpublished += 1;
                }
                Settled::Done
            }
            Disposition::Requeue => {
                self.return_claim(&claim, cancel).await;
                report.requeued += 1;
                Settled::Done
            }
            Disposition::Defer => {
                self.return_claim(&claim, cancel).await;
                report.requeued += 1;
                Settled::Deferred
            }
        };

        status.transition(WorkerStatus::Cleanup)?;
        if let Some(handle) = handle.as_mut() {
            self.loader.unload(handle);
        }
        drop(handle);
        status.transition(WorkerStatus::Active)?;
        Ok(settled)
    }

    async fn execute(
        &self,
        claim: &Claim,
        identity: &WorkerIdentity,
        cancel: &CancellationToken,
    ) -> (Disposition, Option<ModelHandle>) {
        let worker_id = identity.worker_id();
        let host = identity.host();

        let job = match self.resolve_job(&claim.entry).await {
            Ok(job) => job,
            Err((job, e)) if e.is_transient_http() => {
                warn!(job_id = %job.job_id, "Job lookup failed, returning it to the queue: {}", e);
                return (Disposition::Defer, None);
            }
            Err((job, e)) => {
                warn!(job_id = %job.job_id, "Rejecting unusable queue entry: {}", e);
                return (Disposition::Publish(JobResult::rejected(&job, worker_id, host, &e)), None);
            }
        };

        let target = match job.target() {
            Ok(target) => target,
            Err(e) => {
                warn!(job_id = %job.job_id, "Rejecting job: {}", e);
                return (Disposition::Publish(JobResult::rejected(&job, worker_id, host, &e)), None);
            }
        };

        if identity.resolve(&target).is_none() {
            let e = Error::UnsupportedComputeUnit(target.to_string());
            warn!(job_id = %job.job_id, "Rejecting job: {}", e);
            return (Disposition::Publish(JobResult::rejected(&job, worker_id, host, &e)), None);
        }

        info!(
            job_id = %job.job_id,
            target_unit = %target,
            runs = job.run_count,
            "Executing job"
        );

        let handle = match self.loader.load(&job.model_reference, &target).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(job_id = %job.job_id, "Model load failed: {}", e);
                let result = JobResult::failed(&job, worker_id, host, None, &e, PartialMetrics::default());
                return (Disposition::Publish(result), None);
            }
        };

        let engine = self.benchmark.clone();
        let probe = (self.gpu_probe)(target.device);
        let token = cancel.clone();
        let run_count = job.run_count;

        let joined = tokio::task::spawn_blocking(move || {
            let mut handle = handle;
            let outcome = engine.run_with_probe(&mut handle, run_count, &token, probe.as_ref());
            (handle, outcome)
        })
        .await;

        let (handle, outcome) = match joined {
            Ok(joined) => joined,
            Err(e) => {
                // The handle was dropped, and so unloaded, with the failed task
                let e = Error::Internal(format!("benchmark task failed: {}", e));
                error!(job_id = %job.job_id, "{}", e);
                let result = JobResult::failed(&job, worker_id, host, None, &e, PartialMetrics::default());
                return (Disposition::Publish(result), None);
            }
        };

        let artifact = handle.artifact_info().clone();
        let disposition = match outcome {
            Ok(result) => {
                info!(
                    job_id = %job.job_id,
                    median_ms = result.inference.median_ms,
                    "Job complete"
                );
                Disposition::Publish(JobResult::complete(&job, worker_id, host, &artifact, &result))
            }
            Err(e) if e.is_interrupted() => {
                info!(job_id = %job.job_id, "Job interrupted by shutdown, returning it to the queue");
                Disposition::Requeue
            }
            Err(e) => {
                let partial = e.partial_metrics();
                let e = Error::from(e);
                warn!(job_id = %job.job_id, "Benchmark failed: {}", e);
                Disposition::Publish(JobResult::failed(&job, worker_id, host, Some(&artifact), &e, partial))
            }
        };

        (disposition, Some(handle))
    }

    /// Turns a queue entry into a job, or a placeholder and the reason it failed
    async fn resolve_job(&self, entry: &str) -> std::result::Result<Job, (Job, Error)> {
        let mut job = match decode_entry(entry) {
            Entry::Descriptor(job) => job,
            Entry::JobId(job_id) => {
                debug!(job_id = %job_id, "Looking up job descriptor");
                self.api
                    .job_details(&job_id)
                    .await
                    .map_err(|e| (placeholder_job(job_id), e))?
            }
            Entry::Malformed { job_id, error } => return Err((placeholder_job(job_id), error)),
        };

        if job.run_count == 0 {
            job.run_count = self.settings.default_run_count;
        }
        Ok(job)
    }

    /// Publishes `result` and acknowledges the claim
    ///
    /// The claim is acknowledged only after the result is stored. Returns
    /// false when publishing gave up; the claim is then returned to its
    /// queue so the job runs again.
    async fn publish_and_ack(&self, claim: &Claim, result: &JobResult, cancel: &CancellationToken) -> bool {
        let published = self
            .settings
            .broker_retry
            .retry("publish result", Error::is_broker, |_| self.broker.publish_result(result))
            .await;

        if let Err(e) = published {
            error!(job_id = %result.job_id, "Giving up on publishing result, returning the job to the queue: {}", e);
            self.return_claim(claim, cancel).await;
            return false;
        }
        debug!(job_id = %result.job_id, status = ?result.status, "Result published");

        // Redelivery is tolerated; the orchestrator keeps the last result
        if !self.settle("acknowledge job", cancel, || self.broker.ack(claim)).await {
            warn!(job_id = %result.job_id, "Job left unacknowledged, it is recovered on the next start");
        }
        true
    }

    async fn return_claim(&self, claim: &Claim, cancel: &CancellationToken) {
        if !self.settle("requeue job", cancel, || self.broker.requeue(claim)).await {
            warn!(queue = %claim.source_queue, "Job left in the processing list, it is recovered on the next start");
        }
    }

    /// Repeats a broker command until it lands
    ///
    /// Stops early only for non-broker errors or once shutdown is requested
    /// and the current round of attempts is used up.
    async fn settle<F, Fut>(&self, op_name: &str, cancel: &CancellationToken, mut op: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let policy = &self.settings.broker_retry;
        let mut outage = policy.backoff();
        loop {
            let e = match policy.retry(op_name, Error::is_broker, |_| op()).await {
                Ok(()) => return true,
                Err(e) => e,
            };
            if !e.is_broker() || cancel.is_cancelled() {
                error!(operation = op_name, "Broker command failed: {}", e);
                return false;
            }

            let delay = next_pause(&mut outage);
            warn!(
                operation = op_name,
                delay_ms = delay.as_millis() as u64,
                "Broker still refusing, holding the job: {}",
                e
            );
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

//! Fakes shared by the agent scenario tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use common::error::{Error, Result};
use common::{
    ComputeDevice, ComputeUnit, EngineKind, HeartbeatRecord, HostMetadata, Job, RetryPolicy, WorkerIdentity,
    WorkerStatus,
};
use inference_engine::{EngineRegistry, InferenceEngine, LoadedModel};
use job_broker::InMemoryBroker;
use model_manager::{ArtifactFetcher, ModelLoader};
use orchestrator_client::OrchestratorApi;
use performance_monitor::{BenchmarkEngine, GpuProbe, NoGpuProbe, Stopwatch};
use worker_agent::{AgentReport, AgentSettings, WorkerAgent};

pub const WORKER_ID: &str = "worker-test";
pub const CPU_QUEUE: &str = "jobs:capability:cpu_onnx";
pub const MACHINE_ID: &str = "test-machine";
pub const PROCESSING: &str = "jobs:processing:test-machine";

/// Orchestrator that records every call
#[derive(Default)]
pub struct FakeOrchestrator {
    /// Worker ids sent with each registration attempt
    pub registrations: Mutex<Vec<String>>,
    failing_registrations: AtomicUsize,
    failing_lookups: AtomicUsize,
    /// Job ids passed to each lookup
    pub lookups: Mutex<Vec<String>>,
    pub heartbeats: Mutex<Vec<HeartbeatRecord>>,
    pub statuses: Mutex<Vec<WorkerStatus>>,
    pub jobs: Mutex<HashMap<String, Job>>,
}

impl FakeOrchestrator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_registrations(&self, count: usize) {
        self.failing_registrations.store(count, Ordering::SeqCst);
    }

    /// Answers the next `count` job lookups with a transport error
    pub fn fail_lookups(&self, count: usize) {
        self.failing_lookups.store(count, Ordering::SeqCst);
    }

    pub fn heartbeat_statuses(&self) -> Vec<WorkerStatus> {
        self.heartbeats.lock().iter().map(|record| record.status).collect()
    }
}

#[async_trait]
impl OrchestratorApi for FakeOrchestrator {
    async fn health(&self) -> Result<()> {
        Ok(())
    }

    async fn register(&self, identity: &WorkerIdentity) -> Result<String> {
        self.registrations.lock().push(identity.worker_id().to_string());
        let refused = self
            .failing_registrations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::Registration("connection refused".to_string()));
        }
        Ok(identity.worker_id().to_string())
    }

    async fn update_status(&self, _worker_id: &str, status: WorkerStatus) -> Result<()> {
        self.statuses.lock().push(status);
        Ok(())
    }

    async fn heartbeat(&self, record: &HeartbeatRecord) -> Result<()> {
        self.heartbeats.lock().push(record.clone());
        Ok(())
    }

    async fn job_details(&self, job_id: &str) -> Result<Job> {
        self.lookups.lock().push(job_id.to_string());
        let unreachable = self
            .failing_lookups
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if unreachable {
            return Err(Error::Http("503 Service Unavailable".to_string()));
        }
        self.jobs
            .lock()
            .get(job_id)
            .cloned()
            .ok_or_else(|| Error::UnknownJob(job_id.to_string()))
    }
}

/// How the scripted model behaves
#[derive(Debug, Clone, Default)]
pub struct ModelScript {
    /// 1-based pass that fails
    pub fail_on: Option<usize>,
    /// Real time spent in every pass
    pub pass_time: Duration,
}

#[derive(Default)]
pub struct ModelCounters {
    pub loads: AtomicUsize,
    pub passes: AtomicUsize,
    pub unloads: AtomicUsize,
}

struct ScriptedModel {
    script: ModelScript,
    counters: Arc<ModelCounters>,
    pass: usize,
}

impl LoadedModel for ScriptedModel {
    fn infer(&mut self) -> Result<()> {
        self.pass += 1;
        self.counters.passes.fetch_add(1, Ordering::SeqCst);
        if !self.script.pass_time.is_zero() {
            std::thread::sleep(self.script.pass_time);
        }
        if self.script.fail_on == Some(self.pass) {
            return Err(Error::Inference {
                message: "output tensor shape mismatch".to_string(),
                completed_runs: 0,
            });
        }
        Ok(())
    }

    fn unload(&mut self) {
        self.counters.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

/// ONNX-tagged engine serving CPU only
struct ScriptedEngine {
    script: ModelScript,
    counters: Arc<ModelCounters>,
}

impl InferenceEngine for ScriptedEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Onnx
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["onnx"]
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_device(&self, device: ComputeDevice) -> bool {
        device == ComputeDevice::Cpu
    }

    fn load(&self, _path: &Path, _device: ComputeDevice) -> Result<Box<dyn LoadedModel>> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedModel {
            script: self.script.clone(),
            counters: self.counters.clone(),
            pass: 0,
        }))
    }
}

/// Reports pre-recorded pass durations
pub struct ScriptedStopwatch {
    durations: Mutex<VecDeque<f64>>,
}

impl ScriptedStopwatch {
    pub fn new(durations_ms: &[f64]) -> Arc<Self> {
        Arc::new(Self {
            durations: Mutex::new(durations_ms.iter().copied().collect()),
        })
    }
}

impl Stopwatch for ScriptedStopwatch {
    fn measure(&self, pass: &mut dyn FnMut() -> Result<()>) -> (Result<()>, Duration) {
        let outcome = pass();
        let ms = self.durations.lock().pop_front().unwrap_or(1.0);
        (outcome, Duration::from_secs_f64(ms / 1000.0))
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay_ms: 1,
        multiplier: 2.0,
        max_delay_ms: 5,
        jitter: 0.0,
    }
}

pub fn settings() -> AgentSettings {
    AgentSettings {
        heartbeat_interval: Duration::from_millis(10),
        poll_timeout: Duration::from_millis(10),
        default_run_count: 10,
        processing_prefix: "jobs:processing".to_string(),
        registration_retry: fast_retry(5),
        broker_retry: fast_retry(5),
    }
}

/// A CPU-only worker identity
pub fn identity() -> WorkerIdentity {
    identity_as(WORKER_ID)
}

/// The same machine registered under another worker id, as after a restart
pub fn identity_as(worker_id: &str) -> WorkerIdentity {
    let host = HostMetadata {
        udid: MACHINE_ID.to_string(),
        ..HostMetadata::default()
    };
    WorkerIdentity::new(
        "test-box",
        vec![
            ComputeUnit::new(ComputeDevice::Cpu, EngineKind::Onnx, true),
            ComputeUnit::new(ComputeDevice::Gpu, EngineKind::Onnx, false),
        ],
        host,
    )
    .confirmed(worker_id)
}

/// Agent wired to in-process fakes
pub struct Harness {
    pub api: Arc<FakeOrchestrator>,
    pub broker: Arc<InMemoryBroker>,
    pub counters: Arc<ModelCounters>,
    pub agent: Arc<WorkerAgent>,
    pub model_path: PathBuf,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(script: ModelScript, latencies_ms: &[f64]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.onnx");
        std::fs::write(&model_path, b"graph").unwrap();

        let counters = Arc::new(ModelCounters::default());
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(ScriptedEngine {
            script,
            counters: counters.clone(),
        }));

        let fetcher = ArtifactFetcher::new(dir.path().join("downloads"), Duration::from_secs(1)).unwrap();
        let loader = ModelLoader::new(fetcher, Arc::new(registry), Duration::from_millis(1));
        let benchmark = BenchmarkEngine::new(Duration::from_millis(1)).with_stopwatch(ScriptedStopwatch::new(latencies_ms));

        let api = FakeOrchestrator::new();
        let broker = Arc::new(InMemoryBroker::new());
        let agent = WorkerAgent::new(
            settings(),
            api.clone(),
            broker.clone(),
            Arc::new(loader),
            Arc::new(benchmark),
        )
        .with_gpu_probe(Arc::new(|_: ComputeDevice| -> Arc<dyn GpuProbe> { Arc::new(NoGpuProbe) }));

        Self {
            api,
            broker,
            counters,
            agent: Arc::new(agent),
            model_path,
            _dir: dir,
        }
    }

    /// JSON descriptor for the local model
    pub fn job(&self, job_id: &str, unit: &str, runs: u32) -> String {
        serde_json::json!({
            "job_id": job_id,
            "model_url": self.model_path.to_string_lossy(),
            "compute_unit": unit,
            "num_inference_runs": runs,
        })
        .to_string()
    }

    /// Runs the agent in the background
    pub fn start(&self) -> (CancellationToken, JoinHandle<Result<AgentReport>>) {
        self.start_as(identity())
    }

    /// Runs the agent in the background under `identity`
    pub fn start_as(&self, identity: WorkerIdentity) -> (CancellationToken, JoinHandle<Result<AgentReport>>) {
        let cancel = CancellationToken::new();
        let agent = self.agent.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { agent.serve(identity, token).await });
        (cancel, handle)
    }

    /// Statuses reported so far, with the initial `Active` dropped
    pub fn job_cycles(&self) -> Vec<Vec<WorkerStatus>> {
        let statuses = self.api.statuses.lock().clone();
        statuses[1..].chunks(3).map(<[WorkerStatus]>::to_vec).collect()
    }

    pub async fn wait_for_results(&self, count: usize) {
        let broker = self.broker.clone();
        wait_until(move || broker.results().len() >= count).await;
    }
}

/// Polls `condition` until it holds, failing the test after ten seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

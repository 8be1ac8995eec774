//! Common data models for the benchmark worker
//!
//! This module defines the records exchanged between the worker components,
//! the job broker and the orchestrator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default number of inference passes per job
pub const DEFAULT_RUN_COUNT: u32 = 10;

/// Physical device family a model can execute on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComputeDevice {
    /// General purpose CPU
    Cpu,
    /// Discrete or integrated GPU
    Gpu,
    /// Dedicated neural accelerator (e.g. Apple Neural Engine)
    NeuralEngine,
    /// DirectML device (Windows GPU/NPU)
    DirectMl,
    /// Intel OpenVINO device
    OpenVino,
}

impl ComputeDevice {
    /// Engine assumed when a compute unit label names only the device
    pub fn default_engine(&self) -> EngineKind {
        match self {
            ComputeDevice::NeuralEngine => EngineKind::CoreMl,
            _ => EngineKind::Onnx,
        }
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => write!(f, "CPU"),
            ComputeDevice::Gpu => write!(f, "GPU"),
            ComputeDevice::NeuralEngine => write!(f, "Neural Engine"),
            ComputeDevice::DirectMl => write!(f, "DirectML"),
            ComputeDevice::OpenVino => write!(f, "OpenVINO"),
        }
    }
}

impl FromStr for ComputeDevice {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['_', '-'], " ").as_str() {
            "cpu" => Ok(ComputeDevice::Cpu),
            "gpu" | "cuda" => Ok(ComputeDevice::Gpu),
            "neural engine" | "ane" | "npu" => Ok(ComputeDevice::NeuralEngine),
            "directml" | "dml" => Ok(ComputeDevice::DirectMl),
            "openvino" => Ok(ComputeDevice::OpenVino),
            _ => Err(format!("Unknown compute device: {}", s)),
        }
    }
}

/// Inference engine family
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    /// ONNX Runtime
    Onnx,
    /// Apple CoreML
    CoreMl,
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Onnx => write!(f, "ONNX"),
            EngineKind::CoreMl => write!(f, "CoreML"),
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "onnx" | "onnxruntime" => Ok(EngineKind::Onnx),
            "coreml" => Ok(EngineKind::CoreMl),
            _ => Err(format!("Unknown inference engine: {}", s)),
        }
    }
}

/// A (device, engine) pair, rendered as `"CPU (ONNX)"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ComputeTarget {
    /// Device the model runs on
    pub device: ComputeDevice,
    /// Engine driving the device
    pub engine: EngineKind,
}

impl ComputeTarget {
    /// Creates a new compute target
    pub const fn new(device: ComputeDevice, engine: EngineKind) -> Self {
        Self { device, engine }
    }

    /// Queue-friendly form: `"CPU (ONNX)"` becomes `"cpu_onnx"`
    pub fn normalized(&self) -> String {
        self.to_string()
            .to_lowercase()
            .replace(' ', "_")
            .replace(['(', ')'], "")
    }
}

impl fmt::Display for ComputeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.device, self.engine)
    }
}

impl FromStr for ComputeTarget {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();

        // "Neural Engine (CoreML)"
        if let Some(open) = s.find('(') {
            let device = s[..open].parse::<ComputeDevice>()?;
            let engine = s[open + 1..].trim_end_matches(')').parse::<EngineKind>()?;
            return Ok(Self::new(device, engine));
        }

        // "neural_engine_coreml"
        if let Some(split) = s.rfind('_') {
            if let Ok(engine) = s[split + 1..].parse::<EngineKind>() {
                let device = s[..split].parse::<ComputeDevice>()?;
                return Ok(Self::new(device, engine));
            }
        }

        // "CPU"
        let device = s.parse::<ComputeDevice>()?;
        Ok(Self::new(device, device.default_engine()))
    }
}

/// A compute unit reported by the capability detector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeUnit {
    /// Device and engine
    pub target: ComputeTarget,
    /// Whether the engine can actually run on this host
    pub available: bool,
}

impl ComputeUnit {
    /// Creates a new compute unit
    pub fn new(device: ComputeDevice, engine: EngineKind, available: bool) -> Self {
        Self {
            target: ComputeTarget::new(device, engine),
            available,
        }
    }

    /// Display label used on the wire
    pub fn label(&self) -> String {
        self.target.to_string()
    }
}

impl fmt::Display for ComputeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.target)
    }
}

/// Host description sent at registration and echoed in results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostMetadata {
    #[serde(rename = "DeviceName")]
    pub device_name: String,
    /// CPU brand string
    #[serde(rename = "Soc")]
    pub soc: String,
    /// Installed RAM in whole GiB
    #[serde(rename = "Ram")]
    pub ram_gb: u64,
    #[serde(rename = "DeviceOs")]
    pub os: String,
    #[serde(rename = "DeviceOsVersion")]
    pub os_version: String,
    #[serde(rename = "DiscreteGpu")]
    pub discrete_gpu: Option<String>,
    /// Discrete GPU memory in MiB
    #[serde(rename = "VRam")]
    pub vram_mb: Option<u64>,
    #[serde(rename = "UDID")]
    pub udid: String,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Architecture")]
    pub architecture: String,
    #[serde(rename = "CpuCores")]
    pub cpu_cores: usize,
}

/// Identity under which the worker registers
///
/// Built once at startup; the generated `worker_id` is reused for every
/// registration attempt so retries never mint a second identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerIdentity {
    worker_id: String,
    device_name: String,
    capabilities: Vec<ComputeUnit>,
    host: HostMetadata,
}

impl WorkerIdentity {
    /// Creates a new identity with a freshly generated worker id
    pub fn new(device_name: impl Into<String>, capabilities: Vec<ComputeUnit>, host: HostMetadata) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            device_name: device_name.into(),
            capabilities,
            host,
        }
    }

    /// Adopts the id the orchestrator assigned at registration
    pub fn confirmed(mut self, worker_id: impl Into<String>) -> Self {
        let worker_id = worker_id.into();
        if !worker_id.is_empty() {
            self.worker_id = worker_id;
        }
        self
    }

    /// Gets the worker id
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Gets the device name
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Gets every detected compute unit, available or not
    pub fn capabilities(&self) -> &[ComputeUnit] {
        &self.capabilities
    }

    /// Gets the compute units the worker can execute jobs on
    pub fn available_units(&self) -> impl Iterator<Item = &ComputeUnit> {
        self.capabilities.iter().filter(|unit| unit.available)
    }

    /// Gets the host metadata
    pub fn host(&self) -> &HostMetadata {
        &self.host
    }

    /// Key that survives restarts on the same machine
    ///
    /// The device UDID when known, the worker id otherwise.
    pub fn device_key(&self) -> &str {
        match self.host.udid.trim() {
            "" => &self.worker_id,
            udid => udid,
        }
    }

    /// Finds the local compute unit able to serve a target
    pub fn resolve(&self, target: &ComputeTarget) -> Option<&ComputeUnit> {
        self.available_units().find(|unit| unit.target == *target)
    }
}

/// A benchmarking job pulled from the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    /// Local path or URL of the model artifact
    #[serde(alias = "model_url")]
    pub model_reference: String,
    /// Compute unit label, e.g. `"CPU (ONNX)"`
    #[serde(alias = "compute_unit", default = "default_target_label")]
    pub target_compute_unit: String,
    #[serde(alias = "num_inference_runs", default = "default_run_count")]
    pub run_count: u32,
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub campaign_id: Option<String>,
}

fn default_target_label() -> String {
    ComputeTarget::new(ComputeDevice::Cpu, EngineKind::Onnx).to_string()
}

fn default_run_count() -> u32 {
    DEFAULT_RUN_COUNT
}

impl Job {
    /// Parses the requested compute unit
    pub fn target(&self) -> Result<ComputeTarget> {
        self.target_compute_unit
            .parse()
            .map_err(Error::UnsupportedComputeUnit)
    }
}

/// Worker status as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Idle and eligible for jobs
    Active,
    /// Executing a claimed job
    Busy,
    /// Releasing resources after a job
    Cleanup,
    /// Unrecoverable local error; requires an external restart
    Faulty,
}

impl WorkerStatus {
    /// Returns true if the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;
        match (self, next) {
            (Faulty, _) => false,
            (_, Faulty) => true,
            (Active, Busy) | (Busy, Cleanup) | (Cleanup, Active) => true,
            _ => false,
        }
    }

    /// Compact encoding for atomic storage
    pub fn as_u8(&self) -> u8 {
        match self {
            WorkerStatus::Active => 0,
            WorkerStatus::Busy => 1,
            WorkerStatus::Cleanup => 2,
            WorkerStatus::Faulty => 3,
        }
    }

    /// Inverse of [`WorkerStatus::as_u8`]; unknown values decode as faulty
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerStatus::Active,
            1 => WorkerStatus::Busy,
            2 => WorkerStatus::Cleanup,
            _ => WorkerStatus::Faulty,
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Active => write!(f, "active"),
            WorkerStatus::Busy => write!(f, "busy"),
            WorkerStatus::Cleanup => write!(f, "cleanup"),
            WorkerStatus::Faulty => write!(f, "faulty"),
        }
    }
}

/// Liveness signal; transmitted only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub worker_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: WorkerStatus,
}

impl HeartbeatRecord {
    /// Creates a heartbeat stamped with the current time
    pub fn now(worker_id: impl Into<String>, status: WorkerStatus) -> Self {
        Self {
            worker_id: worker_id.into(),
            timestamp: Utc::now(),
            status,
        }
    }
}

/// Measurement phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Load,
    Inference,
}

/// One timing and resource observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub phase: Phase,
    pub run_index: usize,
    pub latency_ms: f64,
    /// Peak resident memory above the pre-measurement baseline
    pub peak_ram_bytes: u64,
    pub cpu_percent: f32,
}

/// Summary statistics over one phase
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseStats {
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub first_ms: f64,
    pub count: usize,
}

/// GPU usage observed during inference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpuUsage {
    pub utilization_percent: f32,
    pub vram_used_mb: f64,
}

/// Aggregate benchmark outcome for one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub load: PhaseStats,
    pub inference: PhaseStats,
    pub peak_load_ram_mb: f64,
    pub peak_inference_ram_mb: f64,
    pub avg_load_cpu_percent: f32,
    pub avg_inference_cpu_percent: f32,
    /// Absent when the compute unit exposes no GPU counters
    pub gpu: Option<GpuUsage>,
    pub samples: Vec<MetricSample>,
}

/// Artifact description echoed in results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    pub file_name: String,
    pub file_size: u64,
}

/// Result status on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Complete,
    Failed,
    Rejected,
}

/// Load-phase metric fields
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoadMetrics {
    pub load_ms_min: f64,
    pub load_ms_max: f64,
    pub load_ms_average: f64,
    pub load_ms_median: f64,
    pub load_ms_std_dev: f64,
    pub load_ms_first: f64,
    pub peak_load_ram_usage: f64,
    pub average_load_cpu_percent: f32,
}

/// Inference-phase metric fields
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InferenceMetrics {
    pub inference_ms_min: f64,
    pub inference_ms_max: f64,
    pub inference_ms_average: f64,
    pub inference_ms_median: f64,
    pub inference_ms_std_dev: f64,
    pub inference_ms_first: f64,
    pub peak_inference_ram_usage: f64,
    pub average_inference_cpu_percent: f32,
}

/// GPU metric fields
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GpuMetrics {
    pub gpu_utilization: f32,
    pub gpu_vram_usage: f64,
}

impl LoadMetrics {
    /// Builds the wire fields from load statistics
    pub fn from_stats(stats: &PhaseStats, peak_ram_mb: f64, avg_cpu_percent: f32) -> Self {
        Self {
            load_ms_min: stats.min_ms,
            load_ms_max: stats.max_ms,
            load_ms_average: stats.mean_ms,
            load_ms_median: stats.median_ms,
            load_ms_std_dev: stats.std_dev_ms,
            load_ms_first: stats.first_ms,
            peak_load_ram_usage: peak_ram_mb,
            average_load_cpu_percent: avg_cpu_percent,
        }
    }
}

impl InferenceMetrics {
    /// Builds the wire fields from inference statistics
    pub fn from_stats(stats: &PhaseStats, peak_ram_mb: f64, avg_cpu_percent: f32) -> Self {
        Self {
            inference_ms_min: stats.min_ms,
            inference_ms_max: stats.max_ms,
            inference_ms_average: stats.mean_ms,
            inference_ms_median: stats.median_ms,
            inference_ms_std_dev: stats.std_dev_ms,
            inference_ms_first: stats.first_ms,
            peak_inference_ram_usage: peak_ram_mb,
            average_inference_cpu_percent: avg_cpu_percent,
        }
    }
}

impl From<GpuUsage> for GpuMetrics {
    fn from(usage: GpuUsage) -> Self {
        Self {
            gpu_utilization: usage.utilization_percent,
            gpu_vram_usage: usage.vram_used_mb,
        }
    }
}

/// Partial measurements attached to a failed job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialMetrics {
    pub load: Option<LoadMetrics>,
    pub inference: Option<InferenceMetrics>,
    pub completed_runs: usize,
}

/// Result payload published to the results queue, keyed by `job_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: String,
    pub campaign_id: Option<String>,
    pub worker_id: String,
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_runs: Option<usize>,
    #[serde(rename = "FileName")]
    pub file_name: String,
    #[serde(rename = "FileSize")]
    pub file_size: u64,
    #[serde(rename = "ComputeUnits")]
    pub compute_units: String,
    #[serde(flatten)]
    pub host: HostMetadata,
    #[serde(flatten)]
    pub load: Option<LoadMetrics>,
    #[serde(flatten)]
    pub inference: Option<InferenceMetrics>,
    #[serde(flatten)]
    pub gpu: Option<GpuMetrics>,
}

impl JobResult {
    fn base(job: &Job, worker_id: &str, host: &HostMetadata, status: ResultStatus) -> Self {
        Self {
            job_id: job.job_id.clone(),
            campaign_id: job.campaign_id.clone(),
            worker_id: worker_id.to_string(),
            status,
            remark: None,
            error_class: None,
            completed_runs: None,
            file_name: String::new(),
            file_size: 0,
            compute_units: job.target_compute_unit.clone(),
            host: host.clone(),
            load: None,
            inference: None,
            gpu: None,
        }
    }

    /// Builds the payload of a successful job
    pub fn complete(
        job: &Job,
        worker_id: &str,
        host: &HostMetadata,
        artifact: &ArtifactInfo,
        result: &BenchmarkResult,
    ) -> Self {
        let mut payload = Self::base(job, worker_id, host, ResultStatus::Complete);
        payload.file_name = artifact.file_name.clone();
        payload.file_size = artifact.file_size;
        payload.completed_runs = Some(result.inference.count);
        payload.load = Some(LoadMetrics::from_stats(
            &result.load,
            result.peak_load_ram_mb,
            result.avg_load_cpu_percent,
        ));
        payload.inference = Some(InferenceMetrics::from_stats(
            &result.inference,
            result.peak_inference_ram_mb,
            result.avg_inference_cpu_percent,
        ));
        payload.gpu = result.gpu.map(GpuMetrics::from);
        payload
    }

    /// Builds the payload of a job that failed during load or inference
    pub fn failed(
        job: &Job,
        worker_id: &str,
        host: &HostMetadata,
        artifact: Option<&ArtifactInfo>,
        error: &Error,
        partial: PartialMetrics,
    ) -> Self {
        let mut payload = Self::base(job, worker_id, host, ResultStatus::Failed);
        if let Some(artifact) = artifact {
            payload.file_name = artifact.file_name.clone();
            payload.file_size = artifact.file_size;
        }
        payload.remark = Some(error.to_string());
        payload.error_class = Some(error.class().to_string());
        payload.completed_runs = Some(partial.completed_runs);
        payload.load = partial.load;
        payload.inference = partial.inference;
        payload
    }

    /// Builds the payload of a job this worker cannot serve
    pub fn rejected(job: &Job, worker_id: &str, host: &HostMetadata, error: &Error) -> Self {
        let mut payload = Self::base(job, worker_id, host, ResultStatus::Rejected);
        payload.remark = Some(error.to_string());
        payload.error_class = Some(error.class().to_string());
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compute_target_parsing() {
        let cpu: ComputeTarget = "CPU (ONNX)".parse().unwrap();
        assert_eq!(cpu, ComputeTarget::new(ComputeDevice::Cpu, EngineKind::Onnx));

        let ane: ComputeTarget = "Neural Engine (CoreML)".parse().unwrap();
        assert_eq!(ane, ComputeTarget::new(ComputeDevice::NeuralEngine, EngineKind::CoreMl));

        let normalized: ComputeTarget = "neural_engine_coreml".parse().unwrap();
        assert_eq!(normalized, ane);

        let bare: ComputeTarget = "CPU".parse().unwrap();
        assert_eq!(bare, cpu);

        assert!("Quantum (Qiskit)".parse::<ComputeTarget>().is_err());
    }

    #[test]
    fn test_compute_target_display_and_normalized() {
        let target = ComputeTarget::new(ComputeDevice::NeuralEngine, EngineKind::CoreMl);
        assert_eq!(target.to_string(), "Neural Engine (CoreML)");
        assert_eq!(target.normalized(), "neural_engine_coreml");

        let gpu = ComputeTarget::new(ComputeDevice::Gpu, EngineKind::Onnx);
        assert_eq!(gpu.normalized(), "gpu_onnx");
        assert_eq!(gpu.normalized().parse::<ComputeTarget>().unwrap(), gpu);
    }

    #[test]
    fn test_status_transitions() {
        use WorkerStatus::*;
        assert!(Active.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Cleanup));
        assert!(Cleanup.can_transition_to(Active));
        assert!(Busy.can_transition_to(Faulty));
        assert!(Active.can_transition_to(Faulty));

        assert!(!Active.can_transition_to(Cleanup));
        assert!(!Busy.can_transition_to(Active));
        assert!(!Faulty.can_transition_to(Active));
        assert!(!Faulty.can_transition_to(Faulty));
    }

    #[test]
    fn test_status_u8_encoding() {
        for status in [WorkerStatus::Active, WorkerStatus::Busy, WorkerStatus::Cleanup, WorkerStatus::Faulty] {
            assert_eq!(WorkerStatus::from_u8(status.as_u8()), status);
        }
        assert_eq!(WorkerStatus::from_u8(200), WorkerStatus::Faulty);
    }

    #[test]
    fn test_job_accepts_original_field_names() {
        let job: Job = serde_json::from_str(
            r#"{"job_id":"j1","model_url":"https://example.com/m.onnx","compute_unit":"GPU (ONNX)","num_inference_runs":5,"campaign_id":"c9"}"#,
        )
        .unwrap();
        assert_eq!(job.model_reference, "https://example.com/m.onnx");
        assert_eq!(job.run_count, 5);
        assert_eq!(job.campaign_id.as_deref(), Some("c9"));
        assert_eq!(job.target().unwrap().device, ComputeDevice::Gpu);
    }

    #[test]
    fn test_job_defaults() {
        let job: Job = serde_json::from_str(r#"{"job_id":"j2","model_reference":"/tmp/m.onnx"}"#).unwrap();
        assert_eq!(job.run_count, DEFAULT_RUN_COUNT);
        assert_eq!(job.target_compute_unit, "CPU (ONNX)");
        assert!(job.submitted_at.is_none());
    }

    #[test]
    fn test_identity_resolves_only_available_units() {
        let identity = WorkerIdentity::new(
            "bench-box",
            vec![
                ComputeUnit::new(ComputeDevice::Cpu, EngineKind::Onnx, true),
                ComputeUnit::new(ComputeDevice::Gpu, EngineKind::Onnx, false),
            ],
            HostMetadata::default(),
        );
        assert!(identity.worker_id().starts_with("worker-"));
        assert!(identity
            .resolve(&ComputeTarget::new(ComputeDevice::Cpu, EngineKind::Onnx))
            .is_some());
        assert!(identity
            .resolve(&ComputeTarget::new(ComputeDevice::Gpu, EngineKind::Onnx))
            .is_none());
    }

    #[test]
    fn test_confirmed_identity_keeps_generated_id_when_blank() {
        let identity = WorkerIdentity::new("bench-box", Vec::new(), HostMetadata::default());
        let generated = identity.worker_id().to_string();

        let same = identity.clone().confirmed("");
        assert_eq!(same.worker_id(), generated);

        let assigned = identity.confirmed("worker-42");
        assert_eq!(assigned.worker_id(), "worker-42");
        assert_eq!(assigned.device_name(), "bench-box");
    }

    #[test]
    fn test_device_key_prefers_udid() {
        let anonymous = WorkerIdentity::new("bench-box", Vec::new(), HostMetadata::default());
        assert_eq!(anonymous.device_key(), anonymous.worker_id());

        let host = HostMetadata {
            udid: "9f1c2e".into(),
            ..HostMetadata::default()
        };
        let identity = WorkerIdentity::new("bench-box", Vec::new(), host).confirmed("worker-42");
        assert_eq!(identity.device_key(), "9f1c2e");
    }

    #[test]
    fn test_result_payload_field_names() {
        let job: Job = serde_json::from_str(r#"{"job_id":"j3","model_reference":"m.onnx"}"#).unwrap();
        let stats = PhaseStats {
            min_ms: 9.0,
            max_ms: 12.0,
            mean_ms: 10.2,
            median_ms: 10.0,
            std_dev_ms: 0.9,
            first_ms: 10.0,
            count: 10,
        };
        let result = BenchmarkResult {
            load: stats,
            inference: stats,
            peak_load_ram_mb: 42.0,
            peak_inference_ram_mb: 7.5,
            avg_load_cpu_percent: 80.0,
            avg_inference_cpu_percent: 95.0,
            gpu: None,
            samples: Vec::new(),
        };
        let artifact = ArtifactInfo {
            file_name: "m.onnx".into(),
            file_size: 1024,
        };

        let payload = JobResult::complete(&job, "worker-1", &HostMetadata::default(), &artifact, &result);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["status"], "complete");
        assert_eq!(value["InferenceMsMedian"], 10.0);
        assert_eq!(value["LoadMsStdDev"], 0.9);
        assert_eq!(value["PeakLoadRamUsage"], 42.0);
        assert_eq!(value["PeakInferenceRamUsage"], 7.5);
        assert_eq!(value["FileName"], "m.onnx");
        assert_eq!(value["ComputeUnits"], "CPU (ONNX)");
        assert!(value.get("GpuUtilization").is_none());
        assert!(value.get("remark").is_none());
    }

    #[test]
    fn test_rejected_payload_carries_classification() {
        let job: Job = serde_json::from_str(
            r#"{"job_id":"j4","model_reference":"m.onnx","target_compute_unit":"GPU (ONNX)"}"#,
        )
        .unwrap();
        let error = Error::UnsupportedComputeUnit("GPU (ONNX)".into());
        let payload = JobResult::rejected(&job, "worker-1", &HostMetadata::default(), &error);
        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["status"], "rejected");
        assert_eq!(value["error_class"], "UnsupportedComputeUnit");
        assert!(value.get("InferenceMsMedian").is_none());
    }
}

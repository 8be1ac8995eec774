//! Benchmark engine
//!
//! Runs `run_count` inference passes over a loaded model, measuring each
//! pass for latency, peak resident memory and CPU usage, then folds the
//! samples into a [`BenchmarkResult`]. The first failing pass aborts the
//! remaining ones. Cancellation is checked between passes only, so a pass in
//! progress always completes its measurement.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::utils::{bytes_to_mb, duration_ms, measure_execution_time};
use common::{
    BenchmarkResult, Error as WorkerError, GpuUsage, InferenceMetrics, LoadMetrics, MetricSample,
    PartialMetrics, Phase, Result as WorkerResult,
};

use crate::gpu::{GpuProbe, NoGpuProbe};
use crate::sampler::ResourceSampler;
use crate::statistics::summarize;

/// A loaded model the engine can drive
pub trait Benchmarkable: Send {
    /// Sample recorded while the model was loaded
    fn load_sample(&self) -> &MetricSample;

    /// Executes one inference pass
    fn run_inference(&mut self) -> WorkerResult<()>;
}

/// Measures how long one pass takes
pub trait Stopwatch: Send + Sync {
    fn measure(&self, pass: &mut dyn FnMut() -> WorkerResult<()>) -> (WorkerResult<()>, Duration);
}

/// Monotonic wall clock
#[derive(Debug, Default)]
pub struct WallClock;

impl Stopwatch for WallClock {
    fn measure(&self, pass: &mut dyn FnMut() -> WorkerResult<()>) -> (WorkerResult<()>, Duration) {
        measure_execution_time(pass)
    }
}

/// Benchmark failure with the samples gathered before it
#[derive(Error, Debug)]
pub enum BenchmarkError {
    /// An inference pass failed; remaining passes were skipped
    #[error("Inference pass {failed_run} failed: {message}")]
    Inference {
        message: String,
        /// 1-based index of the failing pass
        failed_run: usize,
        load: MetricSample,
        samples: Vec<MetricSample>,
    },

    /// Shutdown was requested between passes
    #[error("Benchmark interrupted after {} passes", .samples.len())]
    Interrupted {
        load: MetricSample,
        samples: Vec<MetricSample>,
    },

    /// The request could not be started
    #[error("Invalid benchmark request: {0}")]
    InvalidRequest(String),
}

impl BenchmarkError {
    /// Passes that completed before the failure
    pub fn completed_runs(&self) -> usize {
        match self {
            BenchmarkError::Inference { samples, .. } | BenchmarkError::Interrupted { samples, .. } => {
                samples.len()
            }
            BenchmarkError::InvalidRequest(_) => 0,
        }
    }

    /// Returns true if the run stopped because of shutdown
    pub fn is_interrupted(&self) -> bool {
        matches!(self, BenchmarkError::Interrupted { .. })
    }

    /// Metrics computed from whatever was measured before the failure
    pub fn partial_metrics(&self) -> PartialMetrics {
        match self {
            BenchmarkError::Inference { load, samples, .. } | BenchmarkError::Interrupted { load, samples } => {
                PartialMetrics {
                    load: load_metrics(load),
                    inference: inference_metrics(samples),
                    completed_runs: samples.len(),
                }
            }
            BenchmarkError::InvalidRequest(_) => PartialMetrics::default(),
        }
    }
}

impl From<BenchmarkError> for WorkerError {
    fn from(err: BenchmarkError) -> Self {
        match err {
            BenchmarkError::Inference { message, samples, .. } => WorkerError::Inference {
                message,
                completed_runs: samples.len(),
            },
            BenchmarkError::Interrupted { samples, .. } => {
                WorkerError::Interrupted(format!("benchmark stopped after {} passes", samples.len()))
            }
            BenchmarkError::InvalidRequest(message) => WorkerError::Inference {
                message,
                completed_runs: 0,
            },
        }
    }
}

fn load_metrics(load: &MetricSample) -> Option<LoadMetrics> {
    summarize(&[load.latency_ms]).map(|stats| {
        LoadMetrics::from_stats(&stats, bytes_to_mb(load.peak_ram_bytes), load.cpu_percent)
    })
}

fn inference_metrics(samples: &[MetricSample]) -> Option<InferenceMetrics> {
    let latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
    summarize(&latencies).map(|stats| {
        InferenceMetrics::from_stats(&stats, peak_ram_mb(samples), average_cpu(samples))
    })
}

fn peak_ram_mb(samples: &[MetricSample]) -> f64 {
    bytes_to_mb(samples.iter().map(|s| s.peak_ram_bytes).max().unwrap_or(0))
}

fn average_cpu(samples: &[MetricSample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.cpu_percent).sum::<f32>() / samples.len() as f32
}

/// Drives repeated inference passes and computes statistics
pub struct BenchmarkEngine {
    sampler: ResourceSampler,
    stopwatch: Arc<dyn Stopwatch>,
}

impl BenchmarkEngine {
    /// Creates an engine sampling resources at `sample_interval`
    pub fn new(sample_interval: Duration) -> Self {
        Self {
            sampler: ResourceSampler::new(sample_interval),
            stopwatch: Arc::new(WallClock),
        }
    }

    /// Uses a different pass timer
    pub fn with_stopwatch(mut self, stopwatch: Arc<dyn Stopwatch>) -> Self {
        self.stopwatch = stopwatch;
        self
    }

    /// Runs the benchmark without GPU sampling
    pub fn run(
        &self,
        model: &mut dyn Benchmarkable,
        run_count: u32,
        cancel: &CancellationToken,
    ) -> Result<BenchmarkResult, BenchmarkError> {
        self.run_with_probe(model, run_count, cancel, &NoGpuProbe)
    }

    /// Runs the benchmark, reading `gpu` after every pass
    pub fn run_with_probe(
        &self,
        model: &mut dyn Benchmarkable,
        run_count: u32,
        cancel: &CancellationToken,
        gpu: &dyn GpuProbe,
    ) -> Result<BenchmarkResult, BenchmarkError> {
        if run_count == 0 {
            return Err(BenchmarkError::InvalidRequest("run count must be positive".to_string()));
        }

        let load = model.load_sample().clone();
        let baseline = self.sampler.current_rss();
        let mut samples = Vec::with_capacity(run_count as usize);
        let mut gpu_readings = Vec::new();

        for run_index in 0..run_count as usize {
            if cancel.is_cancelled() {
                info!(completed = samples.len(), "Benchmark interrupted by shutdown");
                return Err(BenchmarkError::Interrupted { load, samples });
            }

            let session = self.sampler.start();
            let (outcome, elapsed) = self.stopwatch.measure(&mut || model.run_inference());
            let usage = session.finish();

            if let Err(e) = outcome {
                warn!(run = run_index + 1, "Inference pass failed: {}", e);
                return Err(BenchmarkError::Inference {
                    message: pass_failure_message(e),
                    failed_run: run_index + 1,
                    load,
                    samples,
                });
            }

            let sample = MetricSample {
                phase: Phase::Inference,
                run_index,
                latency_ms: duration_ms(elapsed),
                peak_ram_bytes: usage.peak_above(baseline),
                cpu_percent: usage.avg_cpu_percent,
            };
            debug!(run = run_index + 1, latency_ms = sample.latency_ms, "Inference pass complete");
            samples.push(sample);

            if let Some(reading) = gpu.sample() {
                gpu_readings.push(reading);
            }
        }

        let latencies: Vec<f64> = samples.iter().map(|s| s.latency_ms).collect();
        let inference = summarize(&latencies)
            .ok_or_else(|| BenchmarkError::InvalidRequest("no inference samples".to_string()))?;
        let load_stats = summarize(&[load.latency_ms])
            .ok_or_else(|| BenchmarkError::InvalidRequest("no load sample".to_string()))?;

        let result = BenchmarkResult {
            load: load_stats,
            inference,
            peak_load_ram_mb: bytes_to_mb(load.peak_ram_bytes),
            peak_inference_ram_mb: peak_ram_mb(&samples),
            avg_load_cpu_percent: load.cpu_percent,
            avg_inference_cpu_percent: average_cpu(&samples),
            gpu: summarize_gpu(&gpu_readings),
            samples: std::iter::once(load).chain(samples).collect(),
        };

        info!(
            runs = run_count,
            median_ms = result.inference.median_ms,
            "Benchmark complete"
        );

        Ok(result)
    }
}

fn pass_failure_message(err: WorkerError) -> String {
    match err {
        WorkerError::Inference { message, .. } => message,
        other => other.to_string(),
    }
}

/// Mean utilization and peak memory across readings
fn summarize_gpu(readings: &[GpuUsage]) -> Option<GpuUsage> {
    if readings.is_empty() {
        return None;
    }
    let utilization = readings.iter().map(|r| r.utilization_percent).sum::<f32>() / readings.len() as f32;
    let vram = readings.iter().map(|r| r.vram_used_mb).fold(0.0, f64::max);
    Some(GpuUsage {
        utilization_percent: utilization,
        vram_used_mb: vram,
    })
}

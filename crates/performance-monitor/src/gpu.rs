//! GPU usage probes
//!
//! A probe is asked for a reading after every inference pass. Probes that
//! cannot read the device return `None`; the benchmark then omits the GPU
//! fields instead of failing the job.

use std::process::Command;
use std::sync::Arc;

use tracing::trace;

use common::{ComputeDevice, GpuUsage};

/// Source of GPU utilization and memory readings
pub trait GpuProbe: Send + Sync {
    /// One reading, or `None` when the device exposes no counters
    fn sample(&self) -> Option<GpuUsage>;
}

/// Probe for compute units without GPU counters
#[derive(Debug, Default)]
pub struct NoGpuProbe;

impl GpuProbe for NoGpuProbe {
    fn sample(&self) -> Option<GpuUsage> {
        None
    }
}

/// Reads the first NVIDIA GPU through `nvidia-smi`
#[derive(Debug, Default)]
pub struct NvidiaSmiProbe;

impl GpuProbe for NvidiaSmiProbe {
    fn sample(&self) -> Option<GpuUsage> {
        let output = Command::new("nvidia-smi")
            .args(["--query-gpu=utilization.gpu,memory.used", "--format=csv,noheader,nounits"])
            .output()
            .ok()?;

        if !output.status.success() {
            trace!("nvidia-smi exited with {}", output.status);
            return None;
        }

        parse_usage(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses `utilization.gpu, memory.used` CSV output
fn parse_usage(stdout: &str) -> Option<GpuUsage> {
    let line = stdout.lines().map(str::trim).find(|line| !line.is_empty())?;
    let mut parts = line.split(',').map(str::trim);
    let utilization = parts.next()?.parse().ok()?;
    let memory = parts.next()?.parse().ok()?;

    Some(GpuUsage {
        utilization_percent: utilization,
        vram_used_mb: memory,
    })
}

/// Probe matching the device a job runs on
pub fn probe_for(device: ComputeDevice) -> Arc<dyn GpuProbe> {
    match device {
        ComputeDevice::Gpu => Arc::new(NvidiaSmiProbe),
        _ => Arc::new(NoGpuProbe),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_usage() {
        let usage = parse_usage("87, 5321\n").unwrap();
        assert_eq!(usage.utilization_percent, 87.0);
        assert_eq!(usage.vram_used_mb, 5321.0);
    }

    #[test]
    fn test_parse_usage_rejects_garbage() {
        assert!(parse_usage("").is_none());
        assert!(parse_usage("[N/A], [N/A]").is_none());
        assert!(parse_usage("42").is_none());
    }

    #[test]
    fn test_cpu_has_no_gpu_counters() {
        assert!(probe_for(ComputeDevice::Cpu).sample().is_none());
    }
}

//! Discrete GPU discovery through `nvidia-smi`

use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A discrete GPU reported by the driver tools
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscreteGpu {
    pub name: String,
    /// Total memory in MiB
    pub vram_mb: Option<u64>,
}

/// Queries the first NVIDIA GPU; `None` when no driver tool answers
pub fn detect_discrete_gpu() -> Option<DiscreteGpu> {
    let output = Command::new("nvidia-smi")
        .args(["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"])
        .output()
        .ok()?;

    if !output.status.success() {
        debug!("nvidia-smi exited with {}", output.status);
        return None;
    }

    parse_gpu_query(&String::from_utf8_lossy(&output.stdout))
}

/// Parses `name, memory.total` CSV output (MiB, no header)
pub(crate) fn parse_gpu_query(stdout: &str) -> Option<DiscreteGpu> {
    let line = stdout.lines().map(str::trim).find(|line| !line.is_empty())?;
    let mut parts = line.rsplitn(2, ',');
    let memory = parts.next()?.trim();
    let name = parts.next()?.trim();

    if name.is_empty() {
        return None;
    }

    Some(DiscreteGpu {
        name: name.to_string(),
        vram_mb: memory.parse().ok(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gpu_query() {
        let gpu = parse_gpu_query("NVIDIA GeForce RTX 3080, 10240\n").unwrap();
        assert_eq!(gpu.name, "NVIDIA GeForce RTX 3080");
        assert_eq!(gpu.vram_mb, Some(10240));
    }

    #[test]
    fn test_parse_gpu_query_unknown_memory() {
        let gpu = parse_gpu_query("Tesla T4, [N/A]").unwrap();
        assert_eq!(gpu.name, "Tesla T4");
        assert_eq!(gpu.vram_mb, None);
    }

    #[test]
    fn test_parse_gpu_query_empty() {
        assert!(parse_gpu_query("").is_none());
        assert!(parse_gpu_query("10240").is_none());
    }
}

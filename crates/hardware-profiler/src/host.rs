//! Host metadata collection
//!
//! This module reads the CPU, memory and OS description through `sysinfo`
//! and derives the device name and a stable device identifier.

use std::fs;

use sysinfo::{CpuExt, CpuRefreshKind, RefreshKind, System, SystemExt};
use tracing::debug;
use uuid::Uuid;

use common::error::{Error, Result};
use common::HostMetadata;

use crate::gpu::DiscreteGpu;

const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

/// Raw local system facts captured in one pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemSnapshot {
    pub cpu_brand: Option<String>,
    pub cpu_cores: usize,
    pub total_memory_bytes: u64,
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub hostname: Option<String>,
}

impl SystemSnapshot {
    /// Reads the current system
    pub fn capture() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::new())
                .with_memory(),
        );
        sys.refresh_cpu();
        sys.refresh_memory();

        let cpu_brand = sys
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .filter(|brand| !brand.is_empty());

        Self {
            cpu_brand,
            cpu_cores: sys.cpus().len(),
            total_memory_bytes: sys.total_memory(),
            os_name: sys.name(),
            os_version: sys.os_version().or_else(|| sys.kernel_version()),
            hostname: sys.host_name(),
        }
    }

    /// Fails when neither the CPU nor the memory size could be read
    pub fn ensure_usable(&self) -> Result<()> {
        if self.cpu_brand.is_none() && self.total_memory_bytes == 0 {
            return Err(Error::Environment(
                "Unable to read CPU or memory information from the system".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns true on macOS with an Apple-designed CPU
    pub fn is_apple_silicon(&self) -> bool {
        cfg!(target_os = "macos")
            && self
                .cpu_brand
                .as_deref()
                .map_or(false, |brand| brand.contains("Apple"))
    }

    fn hostname_or_unknown(&self) -> String {
        self.hostname.clone().unwrap_or_else(|| "unknown-host".to_string())
    }
}

/// Builds the host description
pub fn build_metadata(
    snapshot: &SystemSnapshot,
    device_name_override: Option<&str>,
    gpu: Option<DiscreteGpu>,
) -> Result<HostMetadata> {
    snapshot.ensure_usable()?;

    let device_name = device_name_override
        .map(str::to_string)
        .filter(|name| !name.trim().is_empty())
        .or_else(board_name)
        .unwrap_or_else(|| snapshot.hostname_or_unknown());

    Ok(HostMetadata {
        device_name,
        soc: snapshot.cpu_brand.clone().unwrap_or_else(|| std::env::consts::ARCH.to_string()),
        ram_gb: snapshot.total_memory_bytes / BYTES_PER_GIB,
        os: snapshot.os_name.clone().unwrap_or_else(|| std::env::consts::OS.to_string()),
        os_version: snapshot.os_version.clone().unwrap_or_default(),
        discrete_gpu: gpu.as_ref().map(|gpu| gpu.name.clone()),
        vram_mb: gpu.and_then(|gpu| gpu.vram_mb),
        udid: device_udid(snapshot),
        hostname: snapshot.hostname_or_unknown(),
        architecture: std::env::consts::ARCH.to_string(),
        cpu_cores: snapshot.cpu_cores,
    })
}

/// Board vendor and name from DMI, Linux only
fn board_name() -> Option<String> {
    if !cfg!(target_os = "linux") {
        return None;
    }

    let read = |path: &str| {
        fs::read_to_string(path)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let vendor = read("/sys/devices/virtual/dmi/id/sys_vendor");
    let board = read("/sys/devices/virtual/dmi/id/board_name");

    match (vendor, board) {
        (Some(vendor), Some(board)) => Some(format!("{} {}", vendor, board)),
        (Some(name), None) | (None, Some(name)) => Some(name),
        (None, None) => None,
    }
}

/// Stable device identifier
///
/// Uses `/etc/machine-id` where present; otherwise the hostname with a random
/// suffix, which is only stable for the process lifetime.
fn device_udid(snapshot: &SystemSnapshot) -> String {
    if let Ok(id) = fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if !id.is_empty() {
            return id.to_string();
        }
    }

    debug!("No machine id available, generating a device id");
    let suffix = Uuid::new_v4().simple().to_string();
    format!("{}_{}", snapshot.hostname_or_unknown(), &suffix[..12])
}

//! Capability detection
//!
//! The detector walks a fixed list of (device, engine) candidates and asks the
//! engine registry whether each can run here. Candidates that cannot are still
//! reported, flagged unavailable, so `info` can show why a unit is missing.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use common::error::Result;
use common::{ComputeDevice, ComputeUnit, EngineKind, HostMetadata};
use inference_engine::EngineRegistry;

use crate::gpu::detect_discrete_gpu;
use crate::host::{build_metadata, SystemSnapshot};

/// Candidate units in reporting order
const CANDIDATES: [(ComputeDevice, EngineKind); 6] = [
    (ComputeDevice::Cpu, EngineKind::Onnx),
    (ComputeDevice::Gpu, EngineKind::Onnx),
    (ComputeDevice::DirectMl, EngineKind::Onnx),
    (ComputeDevice::OpenVino, EngineKind::Onnx),
    (ComputeDevice::Gpu, EngineKind::CoreMl),
    (ComputeDevice::NeuralEngine, EngineKind::CoreMl),
];

/// Result of a full detection pass
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub units: Vec<ComputeUnit>,
    pub host: HostMetadata,
}

impl DetectionReport {
    /// Units the worker can execute jobs on, in detection order
    pub fn available_units(&self) -> Vec<ComputeUnit> {
        self.units.iter().filter(|unit| unit.available).cloned().collect()
    }
}

/// Enumerates local compute units and describes the host
pub struct CapabilityDetector {
    /// Engines compiled into this build
    registry: Arc<EngineRegistry>,
    /// Configured device name, if any
    device_name: Option<String>,
}

impl CapabilityDetector {
    /// Creates a new capability detector
    pub fn new(registry: Arc<EngineRegistry>) -> Self {
        Self {
            registry,
            device_name: None,
        }
    }

    /// Uses a fixed device name instead of the detected one
    pub fn with_device_name(mut self, name: Option<String>) -> Self {
        self.device_name = name;
        self
    }

    /// Lists every candidate unit with its availability
    pub fn detect(&self) -> Result<Vec<ComputeUnit>> {
        let snapshot = SystemSnapshot::capture();
        snapshot.ensure_usable()?;
        Ok(self.units_for(&snapshot))
    }

    /// Lists only the units jobs can run on
    pub fn available_units(&self) -> Result<Vec<ComputeUnit>> {
        Ok(self.detect()?.into_iter().filter(|unit| unit.available).collect())
    }

    /// Detects units and host metadata in one pass
    pub fn detect_all(&self) -> Result<DetectionReport> {
        let snapshot = SystemSnapshot::capture();
        let host = build_metadata(&snapshot, self.device_name.as_deref(), detect_discrete_gpu())?;
        let units = self.units_for(&snapshot);

        info!(
            device = %host.device_name,
            available = units.iter().filter(|unit| unit.available).count(),
            "Detected {} compute unit candidates",
            units.len()
        );

        Ok(DetectionReport { units, host })
    }

    /// Evaluates the candidates against a captured system
    pub fn units_for(&self, snapshot: &SystemSnapshot) -> Vec<ComputeUnit> {
        CANDIDATES
            .iter()
            .map(|&(device, engine)| {
                let available = self.is_runnable(snapshot, device, engine);
                debug!("{} ({}) available: {}", device, engine, available);
                ComputeUnit::new(device, engine, available)
            })
            .collect()
    }

    fn is_runnable(&self, snapshot: &SystemSnapshot, device: ComputeDevice, kind: EngineKind) -> bool {
        if kind == EngineKind::CoreMl && !snapshot.is_apple_silicon() {
            return false;
        }

        self.registry
            .get(kind)
            .map_or(false, |engine| engine.is_available() && engine.supports_device(device))
    }
}

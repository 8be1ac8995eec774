//! CoreML engine
//!
//! CoreML is only reachable through the Objective-C runtime on macOS. This
//! build carries no CoreML bindings, so the engine advertises its devices and
//! formats for detection but reports itself unavailable and refuses to load.

use std::path::Path;

use common::error::{Error, Result};
use common::{ComputeDevice, EngineKind};

use crate::engine::{InferenceEngine, LoadedModel};

/// Apple CoreML runtime
#[derive(Debug, Default)]
pub struct CoreMlEngine;

impl CoreMlEngine {
    /// Creates the engine
    pub fn new() -> Self {
        Self
    }
}

impl InferenceEngine for CoreMlEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::CoreMl
    }

    fn name(&self) -> &'static str {
        "CoreML"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["mlmodel", "mlpackage"]
    }

    fn is_available(&self) -> bool {
        false
    }

    fn supports_device(&self, device: ComputeDevice) -> bool {
        matches!(
            device,
            ComputeDevice::Cpu | ComputeDevice::Gpu | ComputeDevice::NeuralEngine
        )
    }

    fn load(&self, path: &Path, device: ComputeDevice) -> Result<Box<dyn LoadedModel>> {
        Err(Error::ModelLoad(format!(
            "CoreML runtime is not available in this build; cannot load {} on {}",
            path.display(),
            device
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coreml_refuses_to_load() {
        let engine = CoreMlEngine::new();
        assert!(!engine.is_available());
        assert!(engine.supports_device(ComputeDevice::NeuralEngine));
        assert!(!engine.supports_device(ComputeDevice::DirectMl));

        let result = engine.load(Path::new("model.mlmodel"), ComputeDevice::NeuralEngine);
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }
}

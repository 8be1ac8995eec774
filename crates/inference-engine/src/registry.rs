//! Engine registry
//!
//! Maps engine tags to runtime implementations and picks the engine for an
//! artifact based on its file extension.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use common::error::{Error, Result};
use common::{ComputeTarget, EngineKind};

use crate::coreml::CoreMlEngine;
use crate::engine::{EngineInfo, InferenceEngine};

/// Registered inference engines keyed by tag
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: BTreeMap<EngineKind, Arc<dyn InferenceEngine>>,
}

impl EngineRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every engine compiled into this build
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        #[cfg(feature = "onnx")]
        registry.register(Arc::new(crate::onnx::OnnxEngine::new()));
        registry.register(Arc::new(CoreMlEngine::new()));
        registry
    }

    /// Registers an engine, replacing any engine with the same tag
    pub fn register(&mut self, engine: Arc<dyn InferenceEngine>) {
        debug!("Registering inference engine {}", engine.name());
        self.engines.insert(engine.kind(), engine);
    }

    /// Gets the engine for a tag
    pub fn get(&self, kind: EngineKind) -> Option<Arc<dyn InferenceEngine>> {
        self.engines.get(&kind).cloned()
    }

    /// Iterates registered engines in tag order
    pub fn engines(&self) -> impl Iterator<Item = &Arc<dyn InferenceEngine>> {
        self.engines.values()
    }

    /// Diagnostics for every registered engine
    pub fn describe(&self) -> Vec<EngineInfo> {
        self.engines().map(|engine| engine.info()).collect()
    }

    /// Returns true if any registered engine can run on this host
    pub fn has_available_engine(&self) -> bool {
        self.engines().any(|engine| engine.is_available())
    }

    /// Cargo features of this crate that are compiled out of the build
    pub fn missing_features() -> Vec<&'static str> {
        let mut missing = Vec::new();
        if !cfg!(feature = "onnx") {
            missing.push("onnx");
        }
        missing
    }

    /// Why no registered engine can run, or `None` when one can
    ///
    /// Names the features to build with when engines are compiled out.
    pub fn unavailable_reason(&self) -> Option<String> {
        if self.has_available_engine() {
            return None;
        }
        let missing = Self::missing_features();
        if missing.is_empty() {
            return Some("No inference engine can run on this host".to_string());
        }
        Some(format!(
            "No inference engine is available in this build; rebuild with `--features {}`",
            missing.join(",")
        ))
    }

    /// Extensions accepted by the registered engines, e.g. `.onnx`
    pub fn supported_formats(&self) -> Vec<String> {
        self.engines()
            .flat_map(|engine| engine.file_extensions().iter())
            .map(|ext| format!(".{}", ext))
            .collect()
    }

    /// Picks the engine that will load `path` for `target`
    ///
    /// The engine is chosen by file extension and must match the target's
    /// engine tag, be available and support the target device.
    pub fn select(&self, path: &Path, target: &ComputeTarget) -> Result<Arc<dyn InferenceEngine>> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_default();

        let engine = self
            .engines()
            .find(|engine| engine.file_extensions().contains(&extension.as_str()))
            .ok_or_else(|| {
                Error::ModelLoad(format!(
                    "Unsupported model format '{}'; supported formats: {}",
                    path.display(),
                    self.supported_formats().join(", ")
                ))
            })?;

        if engine.kind() != target.engine {
            return Err(Error::ModelLoad(format!(
                "{} is a {} model but the job targets {}",
                path.display(),
                engine.name(),
                target
            )));
        }
        if !engine.is_available() {
            return Err(Error::ModelLoad(format!("{} runtime is not available", engine.name())));
        }
        if !engine.supports_device(target.device) {
            return Err(Error::ModelLoad(format!(
                "{} cannot run on {}",
                engine.name(),
                target.device
            )));
        }

        Ok(engine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LoadedModel;
    use common::ComputeDevice;

    struct StubEngine {
        available: bool,
    }

    struct StubModel;

    impl LoadedModel for StubModel {
        fn infer(&mut self) -> Result<()> {
            Ok(())
        }

        fn unload(&mut self) {}
    }

    impl InferenceEngine for StubEngine {
        fn kind(&self) -> EngineKind {
            EngineKind::Onnx
        }

        fn name(&self) -> &'static str {
            "stub"
        }

        fn file_extensions(&self) -> &'static [&'static str] {
            &["onnx"]
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn supports_device(&self, device: ComputeDevice) -> bool {
            device == ComputeDevice::Cpu
        }

        fn load(&self, _path: &Path, _device: ComputeDevice) -> Result<Box<dyn LoadedModel>> {
            Ok(Box::new(StubModel))
        }
    }

    fn registry(available: bool) -> EngineRegistry {
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(StubEngine { available }));
        registry.register(Arc::new(CoreMlEngine::new()));
        registry
    }

    fn cpu_onnx() -> ComputeTarget {
        ComputeTarget::new(ComputeDevice::Cpu, EngineKind::Onnx)
    }

    #[test]
    fn test_unavailable_reason() {
        assert_eq!(registry(true).unavailable_reason(), None);

        let reason = registry(false).unavailable_reason().unwrap();
        if cfg!(feature = "onnx") {
            assert_eq!(reason, "No inference engine can run on this host");
        } else {
            assert!(reason.ends_with("rebuild with `--features onnx`"), "{}", reason);
        }
    }

    #[test]
    fn test_select_by_extension() {
        let registry = registry(true);
        let engine = registry.select(Path::new("/tmp/model.ONNX"), &cpu_onnx()).unwrap();
        assert_eq!(engine.kind(), EngineKind::Onnx);
    }

    #[test]
    fn test_unknown_extension_lists_formats() {
        let registry = registry(true);
        let err = registry.select(Path::new("/tmp/model.pt"), &cpu_onnx()).err().unwrap();
        let message = err.to_string();
        assert!(message.contains(".onnx"));
        assert!(message.contains(".mlmodel"));
    }

    #[test]
    fn test_engine_mismatch_is_rejected() {
        let registry = registry(true);
        let target = ComputeTarget::new(ComputeDevice::NeuralEngine, EngineKind::CoreMl);
        let result = registry.select(Path::new("model.onnx"), &target);
        assert!(matches!(result, Err(Error::ModelLoad(_))));
    }

    #[test]
    fn test_unavailable_engine_and_device() {
        assert!(registry(false).select(Path::new("model.onnx"), &cpu_onnx()).is_err());

        let gpu = ComputeTarget::new(ComputeDevice::Gpu, EngineKind::Onnx);
        assert!(registry(true).select(Path::new("model.onnx"), &gpu).is_err());
    }

    #[test]
    fn test_describe_and_availability() {
        let registry = registry(true);
        assert!(registry.has_available_engine());
        let info = registry.describe();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, "stub");
        assert!(!info[1].available);

        assert!(!EngineRegistry::new().has_available_engine());
    }
}

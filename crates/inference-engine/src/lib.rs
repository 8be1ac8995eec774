//! Inference engines for the benchmark worker
//!
//! Every runtime (ONNX Runtime, CoreML, ...) implements [`InferenceEngine`]
//! and is looked up through the [`EngineRegistry`] by the engine tag of a
//! compute unit. Adding a runtime means registering another implementation;
//! callers never match on concrete engines.

pub mod coreml;
pub mod engine;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod registry;

// Re-export commonly used types
pub use engine::{EngineInfo, InferenceEngine, LoadedModel};
pub use registry::EngineRegistry;

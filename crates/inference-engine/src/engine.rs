//! Engine traits
//!
//! Loading and inference are synchronous and CPU/accelerator bound; async
//! callers run them on a blocking thread.

use std::path::Path;

use serde::Serialize;

use common::error::Result;
use common::{ComputeDevice, EngineKind};

/// A model runtime able to load artifacts onto compute devices
pub trait InferenceEngine: Send + Sync {
    /// Engine tag matched against compute units
    fn kind(&self) -> EngineKind;

    /// Human-readable runtime name
    fn name(&self) -> &'static str;

    /// Artifact file extensions this engine accepts, without the dot
    fn file_extensions(&self) -> &'static [&'static str];

    /// Whether the runtime is linked and usable on this host
    fn is_available(&self) -> bool;

    /// Whether the runtime can place a model on the given device
    fn supports_device(&self, device: ComputeDevice) -> bool;

    /// Loads the artifact at `path` onto `device`
    ///
    /// Failures are reported as `Error::ModelLoad`. Anything acquired before
    /// the failure is released before returning.
    fn load(&self, path: &Path, device: ComputeDevice) -> Result<Box<dyn LoadedModel>>;

    /// Summary for diagnostics output
    fn info(&self) -> EngineInfo {
        EngineInfo {
            kind: self.kind(),
            name: self.name().to_string(),
            available: self.is_available(),
            formats: self.file_extensions().iter().map(|ext| ext.to_string()).collect(),
        }
    }
}

/// A model resident on a compute device
pub trait LoadedModel: Send {
    /// Executes one inference pass on engine-generated inputs
    fn infer(&mut self) -> Result<()>;

    /// Releases the runtime resources; further calls are no-ops
    fn unload(&mut self);
}

/// Engine summary shown by `info` and `validate`
#[derive(Debug, Clone, Serialize)]
pub struct EngineInfo {
    pub kind: EngineKind,
    pub name: String,
    pub available: bool,
    pub formats: Vec<String>,
}

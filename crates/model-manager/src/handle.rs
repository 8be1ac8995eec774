//! Loaded model handles

use tracing::debug;

use common::error::{Error, Result};
use common::{ArtifactInfo, ComputeTarget, MetricSample};
use inference_engine::LoadedModel;
use performance_monitor::Benchmarkable;

use crate::downloader::Artifact;

/// A model resident on a compute unit together with its artifact
///
/// Releasing the handle unloads the model and deletes a downloaded artifact.
/// [`ModelHandle::unload`] may be called any number of times; dropping the
/// handle unloads it as well.
pub struct ModelHandle {
    model: Option<Box<dyn LoadedModel>>,
    artifact: Option<Artifact>,
    artifact_info: ArtifactInfo,
    load_sample: MetricSample,
    target: ComputeTarget,
}

impl ModelHandle {
    pub(crate) fn new(
        model: Box<dyn LoadedModel>,
        artifact: Artifact,
        load_sample: MetricSample,
        target: ComputeTarget,
    ) -> Self {
        Self {
            model: Some(model),
            artifact_info: artifact.info().clone(),
            artifact: Some(artifact),
            load_sample,
            target,
        }
    }

    /// Compute unit the model was loaded onto
    pub fn target(&self) -> ComputeTarget {
        self.target
    }

    /// Artifact name and size, still available after unload
    pub fn artifact_info(&self) -> &ArtifactInfo {
        &self.artifact_info
    }

    /// Returns true while the model is resident
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Releases the model and its artifact; later calls do nothing
    pub fn unload(&mut self) {
        if let Some(mut model) = self.model.take() {
            model.unload();
            debug!(target_unit = %self.target, "Model unloaded");
        }
        self.artifact.take();
    }
}

impl Benchmarkable for ModelHandle {
    fn load_sample(&self) -> &MetricSample {
        &self.load_sample
    }

    fn run_inference(&mut self) -> Result<()> {
        match self.model.as_mut() {
            Some(model) => model.infer(),
            None => Err(Error::Inference {
                message: "model has been unloaded".to_string(),
                completed_runs: 0,
            }),
        }
    }
}

impl Drop for ModelHandle {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("target", &self.target)
            .field("artifact", &self.artifact_info)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

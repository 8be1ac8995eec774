//! Model loader
//!
//! Loading fetches the artifact, selects the engine for its format and the
//! job's compute unit, then places the model on the device while the
//! process is sampled. The load sample records wall-clock duration and the
//! resident memory growth above the pre-load baseline.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use common::error::{Error, Result};
use common::utils::{bytes_to_mb, duration_ms, measure_execution_time};
use common::{ComputeTarget, MetricSample, Phase};
use inference_engine::{EngineRegistry, LoadedModel};
use performance_monitor::ResourceSampler;

use crate::downloader::ArtifactFetcher;
use crate::handle::ModelHandle;

/// Loads job models onto compute units
pub struct ModelLoader {
    fetcher: ArtifactFetcher,
    registry: Arc<EngineRegistry>,
    sampler: Arc<ResourceSampler>,
}

impl ModelLoader {
    /// Creates a loader sampling memory at `sample_interval` during loads
    pub fn new(fetcher: ArtifactFetcher, registry: Arc<EngineRegistry>, sample_interval: Duration) -> Self {
        Self {
            fetcher,
            registry,
            sampler: Arc::new(ResourceSampler::new(sample_interval)),
        }
    }

    /// Engines available to this loader
    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Fetches `reference` and loads it onto `target`
    ///
    /// Any failure is reported as `Error::ModelLoad`; a downloaded artifact
    /// is removed before the error is returned.
    #[instrument(skip(self, target), fields(target_unit = %target))]
    pub async fn load(&self, reference: &str, target: &ComputeTarget) -> Result<ModelHandle> {
        let artifact = self.fetcher.fetch(reference).await?;
        let engine = self.registry.select(artifact.path(), target)?;

        let path: PathBuf = artifact.path().to_path_buf();
        let device = target.device;
        let sampler = self.sampler.clone();

        let loaded = tokio::task::spawn_blocking(move || {
            let baseline = sampler.current_rss();
            let session = sampler.start();
            let (outcome, elapsed) = measure_execution_time(|| engine.load(&path, device));
            let usage = session.finish();
            outcome.map(|model| (model, elapsed, usage.peak_above(baseline), usage.avg_cpu_percent))
        })
        .await
        .map_err(|e| Error::ModelLoad(format!("Load task failed: {}", e)))?;

        let (model, elapsed, peak_ram_bytes, cpu_percent): (Box<dyn LoadedModel>, _, _, _) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!("Failed to load {}: {}", artifact.info().file_name, e);
                return Err(match e {
                    Error::ModelLoad(_) => e,
                    other => Error::ModelLoad(other.to_string()),
                });
            }
        };

        let load_sample = MetricSample {
            phase: Phase::Load,
            run_index: 0,
            latency_ms: duration_ms(elapsed),
            peak_ram_bytes,
            cpu_percent,
        };

        info!(
            file = %artifact.info().file_name,
            load_ms = load_sample.latency_ms,
            peak_ram_mb = bytes_to_mb(peak_ram_bytes),
            "Model loaded"
        );

        Ok(ModelHandle::new(model, artifact, load_sample, *target))
    }

    /// Releases `handle`; calling it again is a no-op
    pub fn unload(&self, handle: &mut ModelHandle) {
        handle.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use common::{ComputeDevice, EngineKind};
    use inference_engine::InferenceEngine;
    use performance_monitor::Benchmarkable;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct Counters {
        loads: AtomicUsize,
        unloads: AtomicUsize,
        inferences: AtomicUsize,
    }

    struct FakeModel {
        counters: Arc<Counters>,
    }

    impl LoadedModel for FakeModel {
        fn infer(&mut self) -> Result<()> {
            self.counters.inferences.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn unload(&mut self) {
            self.counters.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeOnnx {
        counters: Arc<Counters>,
        fail: bool,
    }

    impl InferenceEngine for FakeOnnx {
        fn kind(&self) -> EngineKind {
            EngineKind::Onnx
        }

        fn name(&self) -> &'static str {
            "fake-onnx"
        }

        fn file_extensions(&self) -> &'static [&'static str] {
            &["onnx"]
        }

        fn is_available(&self) -> bool {
            true
        }

        fn supports_device(&self, device: ComputeDevice) -> bool {
            device == ComputeDevice::Cpu
        }

        fn load(&self, path: &Path, _device: ComputeDevice) -> Result<Box<dyn LoadedModel>> {
            self.counters.loads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::ModelLoad(format!("{} is not a valid graph", path.display())));
            }
            Ok(Box::new(FakeModel {
                counters: self.counters.clone(),
            }))
        }
    }

    const CPU_ONNX: ComputeTarget = ComputeTarget::new(ComputeDevice::Cpu, EngineKind::Onnx);

    fn loader(dir: &Path, fail: bool) -> (ModelLoader, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        let mut registry = EngineRegistry::new();
        registry.register(Arc::new(FakeOnnx {
            counters: counters.clone(),
            fail,
        }));
        let fetcher = ArtifactFetcher::new(dir, Duration::from_secs(2)).unwrap();
        let loader = ModelLoader::new(fetcher, Arc::new(registry), Duration::from_millis(1));
        (loader, counters)
    }

    fn write_model(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"graph").unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_records_sample() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path(), "net.onnx");
        let (loader, counters) = loader(dir.path(), false);

        let mut handle = loader.load(model.to_str().unwrap(), &CPU_ONNX).await.unwrap();
        assert!(handle.is_loaded());
        assert_eq!(handle.target(), CPU_ONNX);
        assert_eq!(handle.artifact_info().file_name, "net.onnx");
        assert_eq!(handle.load_sample().phase, Phase::Load);
        assert!(handle.load_sample().latency_ms >= 0.0);

        handle.run_inference().unwrap();
        assert_eq!(counters.inferences.load(Ordering::SeqCst), 1);
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unload_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path(), "net.onnx");
        let (loader, counters) = loader(dir.path(), false);

        let mut handle = loader.load(model.to_str().unwrap(), &CPU_ONNX).await.unwrap();
        loader.unload(&mut handle);
        loader.unload(&mut handle);
        drop(handle);

        assert_eq!(counters.unloads.load(Ordering::SeqCst), 1);
        // Local artifacts are never deleted
        assert!(model.exists());
    }

    #[tokio::test]
    async fn test_inference_after_unload_fails() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path(), "net.onnx");
        let (loader, _) = loader(dir.path(), false);

        let mut handle = loader.load(model.to_str().unwrap(), &CPU_ONNX).await.unwrap();
        handle.unload();
        assert!(matches!(handle.run_inference(), Err(Error::Inference { .. })));
        assert_eq!(handle.artifact_info().file_name, "net.onnx");
    }

    #[tokio::test]
    async fn test_unknown_format_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path(), "weights.pt");
        let (loader, counters) = loader(dir.path(), false);

        let err = loader.load(model.to_str().unwrap(), &CPU_ONNX).await.unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
        assert!(err.to_string().contains(".onnx"));
        assert_eq!(counters.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unsupported_device_is_model_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let model = write_model(dir.path(), "net.onnx");
        let (loader, _) = loader(dir.path(), false);

        let gpu = ComputeTarget::new(ComputeDevice::Gpu, EngineKind::Onnx);
        let err = loader.load(model.to_str().unwrap(), &gpu).await.unwrap_err();
        assert!(matches!(err, Error::ModelLoad(_)));
    }

    #[tokio::test]
    async fn test_failed_load_removes_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"not a graph".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (loader, counters) = loader(dir.path(), true);

        let err = loader
            .load(&format!("{}/broken.onnx", server.uri()), &CPU_ONNX)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ModelLoad(_)));
        assert_eq!(counters.loads.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_release_deletes_download() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"graph".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let (loader, _) = loader(dir.path(), false);

        let mut handle = loader
            .load(&format!("{}/models/net.onnx", server.uri()), &CPU_ONNX)
            .await
            .unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert_eq!(handle.artifact_info().file_size, 5);

        handle.unload();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}

//! ONNX Runtime engine
//!
//! Models are placed on devices through ONNX Runtime execution providers.
//! Inference inputs are generated from the model's declared input shapes
//! (dynamic dimensions become 1) and zero-filled.

use std::path::Path;

use ort::execution_providers::{
    CUDAExecutionProvider, DirectMLExecutionProvider, ExecutionProvider, ExecutionProviderDispatch,
    OpenVINOExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::{DynValue, Tensor, ValueType};
use tracing::{debug, info};

use common::error::{Error, Result};
use common::{ComputeDevice, EngineKind};

use crate::engine::{InferenceEngine, LoadedModel};

/// ONNX Runtime engine
#[derive(Debug, Default)]
pub struct OnnxEngine;

impl OnnxEngine {
    /// Creates the engine
    pub fn new() -> Self {
        Self
    }

    fn provider_for(device: ComputeDevice) -> Option<ExecutionProviderDispatch> {
        match device {
            ComputeDevice::Cpu => None,
            ComputeDevice::Gpu => Some(CUDAExecutionProvider::default().build().error_on_failure()),
            ComputeDevice::DirectMl => Some(DirectMLExecutionProvider::default().build().error_on_failure()),
            ComputeDevice::OpenVino => Some(OpenVINOExecutionProvider::default().build().error_on_failure()),
            ComputeDevice::NeuralEngine => None,
        }
    }
}

impl InferenceEngine for OnnxEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Onnx
    }

    fn name(&self) -> &'static str {
        "ONNX Runtime"
    }

    fn file_extensions(&self) -> &'static [&'static str] {
        &["onnx"]
    }

    fn is_available(&self) -> bool {
        true
    }

    fn supports_device(&self, device: ComputeDevice) -> bool {
        match device {
            ComputeDevice::Cpu => true,
            ComputeDevice::Gpu => CUDAExecutionProvider::default().is_available().unwrap_or(false),
            ComputeDevice::DirectMl => DirectMLExecutionProvider::default().is_available().unwrap_or(false),
            ComputeDevice::OpenVino => OpenVINOExecutionProvider::default().is_available().unwrap_or(false),
            ComputeDevice::NeuralEngine => false,
        }
    }

    fn load(&self, path: &Path, device: ComputeDevice) -> Result<Box<dyn LoadedModel>> {
        if device == ComputeDevice::NeuralEngine {
            return Err(Error::ModelLoad("ONNX Runtime cannot target the Neural Engine".to_string()));
        }

        let load_err = |e: ort::Error| Error::ModelLoad(format!("Failed to load {}: {}", path.display(), e));

        let mut builder = Session::builder()
            .map_err(load_err)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(load_err)?;

        if let Some(provider) = Self::provider_for(device) {
            builder = builder.with_execution_providers([provider]).map_err(load_err)?;
        }

        let session = builder.commit_from_file(path).map_err(load_err)?;
        let inputs = build_inputs(&session)?;

        info!("Loaded {} on {} with {} inputs", path.display(), device, inputs.len());

        Ok(Box::new(OnnxModel {
            session: Some(session),
            inputs,
        }))
    }
}

/// Zero-filled input template: (name, element type, shape)
type InputSpec = (String, TensorElementType, Vec<i64>);

fn build_inputs(session: &Session) -> Result<Vec<InputSpec>> {
    session
        .inputs
        .iter()
        .map(|input| match &input.input_type {
            ValueType::Tensor { ty, shape, .. } => {
                let dims = shape.iter().map(|&d| if d < 1 { 1 } else { d }).collect();
                Ok((input.name.clone(), *ty, dims))
            }
            other => Err(Error::ModelLoad(format!(
                "Input '{}' has unsupported type {:?}",
                input.name, other
            ))),
        })
        .collect()
}

fn zero_tensor(ty: TensorElementType, shape: &[i64]) -> std::result::Result<DynValue, String> {
    let len = shape.iter().product::<i64>().max(0) as usize;
    let shape = shape.to_vec();
    let value = match ty {
        TensorElementType::Float32 => Tensor::from_array((shape, vec![0f32; len])).map(|t| t.into_dyn()),
        TensorElementType::Float64 => Tensor::from_array((shape, vec![0f64; len])).map(|t| t.into_dyn()),
        TensorElementType::Int64 => Tensor::from_array((shape, vec![0i64; len])).map(|t| t.into_dyn()),
        TensorElementType::Int32 => Tensor::from_array((shape, vec![0i32; len])).map(|t| t.into_dyn()),
        TensorElementType::Uint8 => Tensor::from_array((shape, vec![0u8; len])).map(|t| t.into_dyn()),
        TensorElementType::Bool => Tensor::from_array((shape, vec![false; len])).map(|t| t.into_dyn()),
        other => return Err(format!("unsupported input element type {:?}", other)),
    };
    value.map_err(|e| e.to_string())
}

/// A model loaded into an ONNX Runtime session
struct OnnxModel {
    session: Option<Session>,
    inputs: Vec<InputSpec>,
}

impl LoadedModel for OnnxModel {
    fn infer(&mut self) -> Result<()> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Internal("Inference on an unloaded model".to_string()))?;

        let mut values: Vec<(String, DynValue)> = Vec::with_capacity(self.inputs.len());
        for (name, ty, shape) in &self.inputs {
            let value = zero_tensor(*ty, shape).map_err(|message| Error::Inference {
                message: format!("Input '{}': {}", name, message),
                completed_runs: 0,
            })?;
            values.push((name.clone(), value));
        }

        session.run(values).map_err(|e| Error::Inference {
            message: e.to_string(),
            completed_runs: 0,
        })?;
        Ok(())
    }

    fn unload(&mut self) {
        if self.session.take().is_some() {
            debug!("ONNX session released");
        }
    }
}

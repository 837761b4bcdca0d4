//! ONNX Runtime implementation of the inference engine

use std::borrow::Cow;
use std::path::Path;

use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::{Tensor, ValueType};
use tracing::{debug, info};

use sentvec_core::{Error, Result};

use crate::engine::{
    InferenceEngine, InferenceSession, InputTensor, ModelSignature, OutputRequest, OutputTensor,
    TensorDescriptor,
};

/// [`InferenceEngine`] backed by ONNX Runtime
#[derive(Debug, Clone)]
pub struct OnnxEngine {
    name: String,
    intra_threads: Option<usize>,
}

impl Default for OnnxEngine {
    fn default() -> Self {
        Self {
            name: "sentvec".to_string(),
            intra_threads: None,
        }
    }
}

impl OnnxEngine {
    /// Set the name the runtime environment is registered under
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Limit the intra-op thread pool of every session
    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = Some(threads);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn load_session(&self, model: &Path) -> Result<Session> {
        let mut builder = Session::builder()
            .map_err(|e| Error::Inference(format!("Failed to create session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::Inference(format!("Failed to set optimization level: {}", e)))?;

        if let Some(threads) = self.intra_threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(|e| Error::Inference(format!("Failed to set thread count: {}", e)))?;
        }

        builder.commit_from_file(model).map_err(|e| {
            Error::Config(format!("Failed to load ONNX model {}: {}", model.display(), e))
        })
    }
}

fn describe(name: &str, value_type: &ValueType) -> TensorDescriptor {
    match value_type {
        ValueType::Tensor { ty, shape, .. } => {
            TensorDescriptor::new(name, format!("{:?}", ty), shape.iter().copied().collect())
        }
        other => TensorDescriptor::new(name, format!("{:?}", other), Vec::new()),
    }
}

impl InferenceEngine for OnnxEngine {
    fn init_environment(&self) -> Result<()> {
        let committed = ort::init().with_name(&self.name).commit();
        debug!(name = %self.name, ?committed, "ONNX Runtime environment committed");
        Ok(())
    }

    /// ONNX Runtime releases its environment when the process exits
    fn destroy_environment(&self) -> Result<()> {
        debug!(name = %self.name, "ONNX Runtime environment released");
        Ok(())
    }

    fn introspect(&self, model: &Path) -> Result<ModelSignature> {
        let session = self.load_session(model)?;

        Ok(ModelSignature {
            inputs: session
                .inputs
                .iter()
                .map(|input| describe(&input.name, &input.input_type))
                .collect(),
            outputs: session
                .outputs
                .iter()
                .map(|output| describe(&output.name, &output.output_type))
                .collect(),
        })
    }

    fn bind_session(
        &self,
        model: &Path,
        input_names: &[&str],
        output_names: &[&str],
    ) -> Result<Box<dyn InferenceSession>> {
        let session = self.load_session(model)?;

        for name in input_names {
            if !session.inputs.iter().any(|input| input.name == *name) {
                return Err(Error::Config(format!("input {:?} not found in model", name)));
            }
        }
        for name in output_names {
            if !session.outputs.iter().any(|output| output.name == *name) {
                return Err(Error::Config(format!("output {:?} not found in model", name)));
            }
        }

        info!("Loaded ONNX model from {}", model.display());

        Ok(Box::new(OnnxSession {
            session: Some(session),
        }))
    }
}

struct OnnxSession {
    session: Option<Session>,
}

impl InferenceSession for OnnxSession {
    fn run(&mut self, inputs: &[InputTensor<'_>], request: &OutputRequest) -> Result<OutputTensor> {
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Inference("session has been destroyed".into()))?;

        let mut values: Vec<(Cow<'_, str>, SessionInputValue<'_>)> =
            Vec::with_capacity(inputs.len());
        for input in inputs {
            let tensor = Tensor::from_array(input.data.to_owned()).map_err(|e| {
                Error::Inference(format!("Failed to create {} tensor: {}", input.name, e))
            })?;
            values.push((Cow::Owned(input.name.to_string()), tensor.into()));
        }

        let outputs = session
            .run(values)
            .map_err(|e| Error::Inference(format!("ONNX inference failed: {}", e)))?;

        let value = outputs
            .get(request.name.as_str())
            .ok_or_else(|| Error::Inference(format!("output {:?} missing", request.name)))?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Inference(format!("Failed to extract output tensor: {}", e)))?;

        let shape = shape
            .iter()
            .map(|&d| {
                usize::try_from(d)
                    .map_err(|_| Error::Inference(format!("negative output dimension {}", d)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(OutputTensor {
            shape,
            data: data.to_vec(),
        })
    }

    fn destroy(&mut self) -> Result<()> {
        if self.session.take().is_some() {
            debug!("ONNX session released");
        }
        Ok(())
    }
}

//! Collaborator interface of the external inference engine
//!
//! The pipeline only needs to introspect a model, bind a session to named
//! inputs and outputs, and run it synchronously. Anything implementing these
//! traits can drive an [`Encoder`](crate::Encoder); the ONNX Runtime adapter
//! lives in [`crate::onnx`].

use std::fmt;
use std::path::Path;

use ndarray::ArrayView2;

use sentvec_core::Result;

/// Declared shape and element type of one model input or output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorDescriptor {
    pub name: String,
    /// Element type as reported by the engine, e.g. `Int64` or `Float32`
    pub element_type: String,
    /// Declared dims; `-1` marks a symbolic or unknown axis
    pub dims: Vec<i64>,
}

impl TensorDescriptor {
    pub fn new(name: impl Into<String>, element_type: impl Into<String>, dims: Vec<i64>) -> Self {
        Self {
            name: name.into(),
            element_type: element_type.into(),
            dims,
        }
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

impl fmt::Display for TensorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {:?}", self.name, self.element_type, self.dims)
    }
}

/// Declared inputs and outputs of a model
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelSignature {
    pub inputs: Vec<TensorDescriptor>,
    pub outputs: Vec<TensorDescriptor>,
}

impl ModelSignature {
    pub fn input(&self, name: &str) -> Option<&TensorDescriptor> {
        self.inputs.iter().find(|d| d.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&TensorDescriptor> {
        self.outputs.iter().find(|d| d.name == name)
    }
}

/// A named `[B, T]` integer input, borrowed for the duration of one run
#[derive(Debug, Clone, Copy)]
pub struct InputTensor<'a> {
    pub name: &'a str,
    pub data: ArrayView2<'a, i64>,
}

impl InputTensor<'_> {
    pub fn shape(&self) -> [usize; 2] {
        let (rows, cols) = self.data.dim();
        [rows, cols]
    }
}

/// The output the caller expects a run to produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputRequest {
    pub name: String,
    /// `[B, H]` or `[B, T, H]`
    pub shape: Vec<usize>,
}

impl OutputRequest {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A float output tensor returned by a run, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

/// Engine-wide operations: environment lifecycle, introspection, session binding
pub trait InferenceEngine: Send + Sync {
    /// Initialise the process-wide runtime environment. Must be idempotent.
    fn init_environment(&self) -> Result<()>;

    /// Tear down the process-wide runtime environment.
    fn destroy_environment(&self) -> Result<()>;

    /// Read the declared input and output descriptors of a model
    fn introspect(&self, model: &Path) -> Result<ModelSignature>;

    /// Create a session bound to the given input and output names
    fn bind_session(
        &self,
        model: &Path,
        input_names: &[&str],
        output_names: &[&str],
    ) -> Result<Box<dyn InferenceSession>>;
}

/// A session bound to one model; synchronous request/response only
pub trait InferenceSession: Send {
    /// Run the model on `inputs` and return the requested output.
    ///
    /// Implementations return the tensor they actually produced; the caller
    /// checks it against `request.shape`.
    fn run(&mut self, inputs: &[InputTensor<'_>], request: &OutputRequest) -> Result<OutputTensor>;

    /// Release the session's native resources. Calling it again is a no-op.
    fn destroy(&mut self) -> Result<()>;
}

//! In-memory tokenizer and engine for unit tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sentvec_core::{Error, ErrorKind, Result};

use crate::engine::{
    InferenceEngine, InferenceSession, InputTensor, ModelSignature, OutputRequest, OutputTensor,
    TensorDescriptor,
};
use crate::tokenizer::TokenEncoder;

/// Tokenizer with a fixed text -> ids table; unknown texts are rejected
#[derive(Default)]
pub(crate) struct FakeTokenizer {
    texts: HashMap<String, Vec<u32>>,
    vocab: HashMap<String, u32>,
    pad_token: Option<String>,
}

impl FakeTokenizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_text(mut self, text: &str, ids: Vec<u32>) -> Self {
        self.texts.insert(text.to_string(), ids);
        self
    }

    pub(crate) fn with_vocab(mut self, token: &str, id: u32) -> Self {
        self.vocab.insert(token.to_string(), id);
        self
    }

    pub(crate) fn with_pad_token(mut self, token: &str) -> Self {
        self.pad_token = Some(token.to_string());
        self
    }
}

impl TokenEncoder for FakeTokenizer {
    fn encode_single(&self, text: &str) -> Result<Vec<u32>> {
        self.texts
            .get(text)
            .cloned()
            .ok_or_else(|| Error::Tokenization(format!("unknown text {:?}", text)))
    }

    fn token_to_id(&self, token: &str) -> Option<u32> {
        self.vocab.get(token).copied()
    }

    fn pad_token(&self) -> Option<&str> {
        self.pad_token.as_deref()
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }
}

/// Counters shared between a [`FakeEngine`] and the test that built it
#[derive(Debug, Default)]
pub(crate) struct EngineProbe {
    pub(crate) env_inits: AtomicUsize,
    pub(crate) env_destroys: AtomicUsize,
    pub(crate) introspections: AtomicUsize,
    pub(crate) sessions_bound: AtomicUsize,
    pub(crate) sessions_destroyed: AtomicUsize,
    pub(crate) runs: AtomicUsize,
}

type RunFn = dyn Fn(&[InputTensor<'_>], &OutputRequest) -> Result<OutputTensor> + Send + Sync;

/// Engine whose model signature and run output are set by the test
pub(crate) struct FakeEngine {
    signature: ModelSignature,
    run: Arc<RunFn>,
    probe: Arc<EngineProbe>,
    fail_env_destroy: bool,
    session_destroy_error: Option<ErrorKind>,
}

impl FakeEngine {
    fn with_output_dims(dims: Vec<i64>) -> Self {
        let signature = ModelSignature {
            inputs: vec![
                TensorDescriptor::new("input_ids", "Int64", vec![-1, -1]),
                TensorDescriptor::new("attention_mask", "Int64", vec![-1, -1]),
            ],
            outputs: vec![TensorDescriptor::new("out", "Float32", dims)],
        };
        Self {
            signature,
            run: Arc::new(|_: &[InputTensor<'_>], request: &OutputRequest| {
                Ok(OutputTensor {
                    shape: request.shape.clone(),
                    data: vec![1.0; request.element_count()],
                })
            }),
            probe: Arc::new(EngineProbe::default()),
            fail_env_destroy: false,
            session_destroy_error: None,
        }
    }

    /// Model with a `[B, H]` output named `out`
    pub(crate) fn pooled(hidden_dim: i64) -> Self {
        Self::with_output_dims(vec![-1, hidden_dim])
    }

    /// Model with a `[B, T, H]` output named `out`
    pub(crate) fn per_token(hidden_dim: i64) -> Self {
        Self::with_output_dims(vec![-1, -1, hidden_dim])
    }

    pub(crate) fn with_run<F>(mut self, run: F) -> Self
    where
        F: Fn(&[InputTensor<'_>], &OutputRequest) -> Result<OutputTensor> + Send + Sync + 'static,
    {
        self.run = Arc::new(run);
        self
    }

    /// Return `data` for every run, with the requested shape
    pub(crate) fn returning(self, data: Vec<f32>) -> Self {
        self.with_run(move |_, request| {
            Ok(OutputTensor {
                shape: request.shape.clone(),
                data: data.clone(),
            })
        })
    }

    pub(crate) fn failing_env_destroy(mut self) -> Self {
        self.fail_env_destroy = true;
        self
    }

    pub(crate) fn failing_session_destroy(self) -> Self {
        self.failing_session_destroy_with(ErrorKind::Lifecycle)
    }

    /// Make session teardown fail with an error of the given kind
    pub(crate) fn failing_session_destroy_with(mut self, kind: ErrorKind) -> Self {
        self.session_destroy_error = Some(kind);
        self
    }

    pub(crate) fn probe(&self) -> Arc<EngineProbe> {
        Arc::clone(&self.probe)
    }
}

impl InferenceEngine for FakeEngine {
    fn init_environment(&self) -> Result<()> {
        self.probe.env_inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn destroy_environment(&self) -> Result<()> {
        self.probe.env_destroys.fetch_add(1, Ordering::SeqCst);
        if self.fail_env_destroy {
            return Err(Error::Lifecycle("environment still in use".into()));
        }
        Ok(())
    }

    fn introspect(&self, _model: &Path) -> Result<ModelSignature> {
        self.probe.introspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.signature.clone())
    }

    fn bind_session(
        &self,
        _model: &Path,
        _input_names: &[&str],
        _output_names: &[&str],
    ) -> Result<Box<dyn InferenceSession>> {
        self.probe.sessions_bound.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            run: Arc::clone(&self.run),
            probe: Arc::clone(&self.probe),
            destroy_error: self.session_destroy_error,
        }))
    }
}

struct FakeSession {
    run: Arc<RunFn>,
    probe: Arc<EngineProbe>,
    destroy_error: Option<ErrorKind>,
}

impl InferenceSession for FakeSession {
    fn run(&mut self, inputs: &[InputTensor<'_>], request: &OutputRequest) -> Result<OutputTensor> {
        self.probe.runs.fetch_add(1, Ordering::SeqCst);
        (self.run)(inputs, request)
    }

    fn destroy(&mut self) -> Result<()> {
        self.probe.sessions_destroyed.fetch_add(1, Ordering::SeqCst);
        match self.destroy_error {
            None => Ok(()),
            Some(ErrorKind::Lifecycle) => Err(Error::Lifecycle("session busy".into())),
            Some(ErrorKind::Inference) => {
                Err(Error::Inference("native release failed".into()))
            }
            Some(ErrorKind::Tokenization) => Err(Error::Tokenization("session busy".into())),
            Some(ErrorKind::Configuration) => Err(Error::Config("session busy".into())),
        }
    }
}

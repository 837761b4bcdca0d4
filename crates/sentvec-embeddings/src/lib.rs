//! sentvec Embeddings - Batch sentence embeddings
//!
//! This crate turns a batch of texts into fixed-size vectors: it tokenizes
//! into padded `[B, T]` tensors, runs a sequence-encoding model through an
//! [`InferenceEngine`], pools per-token output when needed and
//! L2-normalizes the result.

pub mod engine;
pub mod inference;
pub mod lazy;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod pooling;
pub mod runtime;
pub mod shape;
pub mod tokenizer;

#[cfg(test)]
mod test_support;

pub use engine::{
    InferenceEngine, InferenceSession, InputTensor, ModelSignature, OutputRequest, OutputTensor,
    TensorDescriptor,
};
pub use inference::{EncodeMetrics, Encoder, MetricsSnapshot, SentenceTransformer};
pub use lazy::LazyEncoder;
#[cfg(feature = "onnx")]
pub use onnx::OnnxEngine;
pub use pooling::{cosine_similarity, l2_normalize, mean_pool, pool_batch};
pub use runtime::{RuntimeEnvironment, RuntimeState, SessionLifecycle};
pub use shape::{resolve_output_spec, ModelOutputSpec, OutputKind};
pub use tokenizer::{BatchTokenizer, HfTokenEncoder, SpecialTokens, TokenEncoder, TokenizedBatch};

pub use sentvec_core::{EncoderConfig, Error, ErrorKind, Result};

//! sentvec Core - Configuration and error types
//!
//! This crate provides the foundational types shared by the sentvec crates.

pub mod config;
pub mod error;

pub use config::{
    resolve_max_len, EncoderConfig, DEFAULT_MAX_SEQ_LEN, FALLBACK_MAX_SEQ_LEN,
    MAX_SEQ_LEN_CEILING, MODEL_FILENAME, TOKENIZER_FILENAME,
};
pub use error::{Error, ErrorKind, Result};

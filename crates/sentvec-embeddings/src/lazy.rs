//! Lazy-loading encoder wrapper
//!
//! `LazyEncoder` defers opening the model until the first `encode` call,
//! which keeps application startup fast when embeddings are not needed
//! right away.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use sentvec_core::{EncoderConfig, Error, ErrorKind, Result};

use crate::inference::{Encoder, SentenceTransformer};
use crate::runtime::{RuntimeEnvironment, SessionLifecycle};

type Loader = dyn Fn(EncoderConfig, Arc<RuntimeEnvironment>) -> Result<Encoder> + Send + Sync;

/// A lazy-loading wrapper around [`Encoder`]
///
/// # Thread Safety
///
/// `LazyEncoder` is thread-safe. Multiple threads can call `encode()`
/// concurrently; the model is loaded exactly once and calls are serialized
/// on the loaded encoder.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use sentvec_core::EncoderConfig;
/// use sentvec_embeddings::{LazyEncoder, RuntimeEnvironment};
///
/// let config = EncoderConfig::with_model_dir("models/all-MiniLM-L6-v2")
///     .with_output_name("last_hidden_state");
/// let encoder = LazyEncoder::new(config, Arc::new(RuntimeEnvironment::onnx()));
///
/// // Model is NOT loaded yet
/// assert!(!encoder.is_loaded());
///
/// let vectors = encoder.encode(&["Hello, world!"]).unwrap();
/// assert!(encoder.is_loaded());
/// # let _ = vectors;
/// ```
pub struct LazyEncoder {
    config: EncoderConfig,
    runtime: Arc<RuntimeEnvironment>,
    loader: Box<Loader>,
    /// Load errors are cached as (kind, message) so every caller sees the same failure
    encoder: OnceLock<std::result::Result<Mutex<Encoder>, (ErrorKind, String)>>,
    /// Held across the first load and across `close`, so a close never runs mid-load
    closed: Mutex<bool>,
}

impl LazyEncoder {
    /// Create a lazy encoder that opens `config.model_path` on first use
    pub fn new(config: EncoderConfig, runtime: Arc<RuntimeEnvironment>) -> Self {
        Self::with_loader(config, runtime, Encoder::open)
    }

    /// Create a lazy encoder with a custom load step
    pub fn with_loader<F>(config: EncoderConfig, runtime: Arc<RuntimeEnvironment>, loader: F) -> Self
    where
        F: Fn(EncoderConfig, Arc<RuntimeEnvironment>) -> Result<Encoder> + Send + Sync + 'static,
    {
        Self {
            config,
            runtime,
            loader: Box::new(loader),
            encoder: OnceLock::new(),
            closed: Mutex::new(false),
        }
    }

    fn lock_closed(&self) -> Result<MutexGuard<'_, bool>> {
        self.closed
            .lock()
            .map_err(|e| Error::Lifecycle(format!("Failed to acquire close lock: {}", e)))
    }

    fn ensure_loaded(&self) -> Result<&Mutex<Encoder>> {
        let closed = self.lock_closed()?;
        if *closed {
            return Err(Error::Inference("encoder not initialized".into()));
        }

        let result = self.encoder.get_or_init(|| {
            match (self.loader)(self.config.clone(), Arc::clone(&self.runtime)) {
                Ok(encoder) => Ok(Mutex::new(encoder)),
                Err(e) => Err((e.kind(), e.to_string())),
            }
        });
        drop(closed);

        match result {
            Ok(mutex) => Ok(mutex),
            Err((kind, msg)) => Err(cached_load_error(*kind, msg)),
        }
    }

    /// Encode a batch, loading the model first if needed
    pub fn encode<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Vec<f32>>> {
        let encoder_mutex = self.ensure_loaded()?;
        let mut encoder = encoder_mutex
            .lock()
            .map_err(|e| Error::Inference(format!("Failed to acquire encoder lock: {}", e)))?;
        encoder.encode(texts)
    }

    /// Check if the encoder has been loaded
    pub fn is_loaded(&self) -> bool {
        matches!(self.encoder.get(), Some(Ok(_)))
    }

    /// Check if the model directory has both artifacts, without loading them
    pub fn is_available(&self) -> bool {
        self.config.model_file().is_file() && self.config.tokenizer_file().is_file()
    }

    /// Get the encoder configuration
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Close the loaded encoder, if any.
    ///
    /// When nothing was loaded there is no session to destroy, but the
    /// runtime ownership flag is still honoured. A load in progress on another
    /// thread finishes first. Later `encode` calls fail.
    pub fn close(&self) -> Result<()> {
        let mut closed = self.lock_closed()?;
        *closed = true;

        match self.encoder.get() {
            Some(Ok(mutex)) => {
                let mut encoder = mutex
                    .lock()
                    .map_err(|e| Error::Lifecycle(format!("Failed to acquire encoder lock: {}", e)))?;
                encoder.close()
            }
            _ => SessionLifecycle::unbound(Arc::clone(&self.runtime), !self.config.shared_runtime)
                .close(),
        }
    }
}

fn cached_load_error(kind: ErrorKind, msg: &str) -> Error {
    let msg = format!("encoder failed to load: {}", msg);
    match kind {
        ErrorKind::Configuration => Error::Config(msg),
        ErrorKind::Tokenization => Error::Tokenization(msg),
        ErrorKind::Inference => Error::Inference(msg),
        ErrorKind::Lifecycle => Error::Lifecycle(msg),
    }
}

impl SentenceTransformer for LazyEncoder {
    fn encode(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        LazyEncoder::encode(self, texts)
    }

    fn close(&mut self) -> Result<()> {
        LazyEncoder::close(self)
    }
}

impl fmt::Debug for LazyEncoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyEncoder")
            .field("config", &self.config)
            .field("is_loaded", &self.is_loaded())
            .field("closed", &self.closed.try_lock().map(|c| *c).ok())
            .finish()
    }
}

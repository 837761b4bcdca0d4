//! The encoder: tokenization, inference, pooling and normalization in one call

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use sentvec_core::{EncoderConfig, Error, Result};

use crate::engine::{InferenceSession, InputTensor, OutputRequest};
use crate::pooling::{l2_normalize, pool_batch};
use crate::runtime::{RuntimeEnvironment, SessionLifecycle};
use crate::shape::{resolve_output_spec, ModelOutputSpec};
use crate::tokenizer::{BatchTokenizer, TokenizedBatch};

/// Anything that turns a batch of texts into sentence vectors
pub trait SentenceTransformer {
    /// Encode `texts` into one vector per text, in input order
    fn encode(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Release the encoder's inference resources
    fn close(&mut self) -> Result<()>;
}

/// Thread-safe counters for encode calls
#[derive(Debug, Default)]
pub struct EncodeMetrics {
    /// Total number of texts encoded
    total_texts: AtomicU64,
    /// Total number of non-empty batches
    total_batches: AtomicU64,
    /// Total encode time in microseconds
    total_time_us: AtomicU64,
}

impl EncodeMetrics {
    /// Create new metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed batch
    pub fn record_batch(&self, batch_size: usize, elapsed: Duration) {
        self.total_texts
            .fetch_add(batch_size as u64, Ordering::Relaxed);
        self.total_batches.fetch_add(1, Ordering::Relaxed);
        self.total_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get total texts encoded
    pub fn total_texts(&self) -> u64 {
        self.total_texts.load(Ordering::Relaxed)
    }

    /// Get total number of batches
    pub fn total_batches(&self) -> u64 {
        self.total_batches.load(Ordering::Relaxed)
    }

    /// Get total time spent in encode calls
    pub fn total_time(&self) -> Duration {
        Duration::from_micros(self.total_time_us.load(Ordering::Relaxed))
    }

    /// Get average batch size
    pub fn average_batch_size(&self) -> f64 {
        let batches = self.total_batches();
        if batches > 0 {
            self.total_texts() as f64 / batches as f64
        } else {
            0.0
        }
    }

    /// Get throughput in texts per second
    pub fn throughput_per_second(&self) -> f64 {
        let secs = self.total_time().as_secs_f64();
        if secs > 0.0 {
            self.total_texts() as f64 / secs
        } else {
            0.0
        }
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_texts: self.total_texts(),
            total_batches: self.total_batches(),
            total_time: self.total_time(),
            average_batch_size: self.average_batch_size(),
            throughput_per_second: self.throughput_per_second(),
        }
    }
}

/// A point-in-time snapshot of encode metrics
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_texts: u64,
    pub total_batches: u64,
    pub total_time: Duration,
    pub average_batch_size: f64,
    pub throughput_per_second: f64,
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Texts: {}, Batches: {}, Total time: {:.2}s, Avg batch: {:.1}, Throughput: {:.1}/s",
            self.total_texts,
            self.total_batches,
            self.total_time.as_secs_f64(),
            self.average_batch_size,
            self.throughput_per_second
        )
    }
}

/// Sentence encoder bound to one model
///
/// `encode` takes `&mut self`: calls on one encoder are serialized by the
/// borrow checker. Wrap it in a `Mutex` (or use
/// [`LazyEncoder`](crate::LazyEncoder)) to share it between threads.
pub struct Encoder {
    config: EncoderConfig,
    tokenizer: BatchTokenizer,
    output: ModelOutputSpec,
    lifecycle: SessionLifecycle,
    metrics: EncodeMetrics,
}

impl fmt::Debug for Encoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Encoder")
            .field("config", &self.config)
            .field("output", &self.output)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

impl Encoder {
    /// Open the model directory named by `config.model_path`.
    ///
    /// The directory must contain `model.onnx` and `tokenizer.json`.
    pub fn open(config: EncoderConfig, runtime: Arc<RuntimeEnvironment>) -> Result<Self> {
        config.validate()?;

        if !config.model_path.is_dir() {
            return Err(Error::Config(format!(
                "Model directory not found: {}",
                config.model_path.display()
            )));
        }
        let model_file = config.model_file();
        if !model_file.is_file() {
            return Err(Error::Config(format!(
                "Model file not found: {}",
                model_file.display()
            )));
        }
        let tokenizer_file = config.tokenizer_file();
        if !tokenizer_file.is_file() {
            return Err(Error::Config(format!(
                "Tokenizer file not found: {}",
                tokenizer_file.display()
            )));
        }

        let tokenizer = BatchTokenizer::from_file(&tokenizer_file)?;
        debug!("Tokenizer loaded successfully");

        Self::with_tokenizer(config, tokenizer, runtime)
    }

    /// Build an encoder from an already loaded tokenizer.
    ///
    /// Initialises the runtime environment if needed, resolves the output
    /// layout and binds a session to the configured tensor names. If any of
    /// that fails and the runtime is not shared, the runtime is shut down
    /// again before the error is returned.
    pub fn with_tokenizer(
        config: EncoderConfig,
        tokenizer: BatchTokenizer,
        runtime: Arc<RuntimeEnvironment>,
    ) -> Result<Self> {
        config.validate()?;
        runtime.initialize()?;

        let owns_runtime = !config.shared_runtime;
        Self::build(config, tokenizer, Arc::clone(&runtime)).inspect_err(|e| {
            if owns_runtime {
                warn!("Encoder load failed, shutting runtime down: {}", e);
                if let Err(teardown) = runtime.shutdown() {
                    warn!("Runtime teardown failed: {}", teardown);
                }
            }
        })
    }

    fn build(
        config: EncoderConfig,
        tokenizer: BatchTokenizer,
        runtime: Arc<RuntimeEnvironment>,
    ) -> Result<Self> {
        let model_file = config.model_file();
        info!("Loading model from {}", model_file.display());

        let signature = runtime.engine().introspect(&model_file)?;
        let output = resolve_output_spec(&signature, &config)?;

        let lifecycle = SessionLifecycle::bind(
            runtime,
            &model_file,
            &[
                config.input_ids_name.as_str(),
                config.attention_mask_name.as_str(),
            ],
            &[config.output_name.as_str()],
            !config.shared_runtime,
        )?;

        Ok(Self {
            config,
            tokenizer,
            output,
            lifecycle,
            metrics: EncodeMetrics::new(),
        })
    }

    /// Get the encoder configuration
    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Get the output layout resolved at load time
    pub fn output_spec(&self) -> ModelOutputSpec {
        self.output
    }

    /// Hidden dimension `H` of every returned vector
    pub fn hidden_dim(&self) -> usize {
        self.output.hidden_dim
    }

    /// Get the batch tokenizer
    pub fn tokenizer(&self) -> &BatchTokenizer {
        &self.tokenizer
    }

    /// Get the encode metrics
    pub fn metrics(&self) -> &EncodeMetrics {
        &self.metrics
    }

    /// Check if the encoder still holds a session
    pub fn is_open(&self) -> bool {
        self.lifecycle.has_session()
    }

    /// Encode a batch of texts into one vector of length `H` per text
    pub fn encode<S: AsRef<str>>(&mut self, texts: &[S]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let session = self.lifecycle.session_mut()?;
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let batch = self
            .tokenizer
            .encode_batch(texts, self.config.effective_max_seq_len())?;
        let embeddings = run_batch(session, &batch, &self.config, self.output)?;

        self.metrics.record_batch(texts.len(), start.elapsed());
        Ok(embeddings)
    }

    /// Destroy the session and, unless the runtime is shared, shut the runtime down.
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.lifecycle.close()
    }
}

impl SentenceTransformer for Encoder {
    fn encode(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Encoder::encode(self, texts)
    }

    fn close(&mut self) -> Result<()> {
        Encoder::close(self)
    }
}

/// Run one tokenized batch through the session and pool the result.
///
/// Input and output tensors live only inside this call.
fn run_batch(
    session: &mut dyn InferenceSession,
    batch: &TokenizedBatch,
    config: &EncoderConfig,
    output: ModelOutputSpec,
) -> Result<Vec<Vec<f32>>> {
    let hidden_dim = output.hidden_dim;
    let request = OutputRequest {
        name: config.output_name.clone(),
        shape: output
            .kind
            .output_shape(batch.batch_size(), batch.seq_len(), hidden_dim),
    };
    let inputs = [
        InputTensor {
            name: &config.input_ids_name,
            data: batch.input_ids().view(),
        },
        InputTensor {
            name: &config.attention_mask_name,
            data: batch.attention_mask().view(),
        },
    ];

    debug!(
        batch_size = batch.batch_size(),
        seq_len = batch.seq_len(),
        output_shape = ?request.shape,
        "Running inference"
    );

    let tensor = session.run(&inputs, &request)?;
    if tensor.shape != request.shape {
        return Err(Error::Inference(format!(
            "output shape mismatch: requested {:?}, engine produced {:?}",
            request.shape, tensor.shape
        )));
    }
    if tensor.data.len() != request.element_count() {
        return Err(Error::Inference(format!(
            "output {} holds {} values, expected {}",
            request.name,
            tensor.data.len(),
            request.element_count()
        )));
    }

    let mut embeddings = pool_batch(output.kind, &tensor.data, batch, hidden_dim);
    if !config.skip_normalize {
        for embedding in &mut embeddings {
            l2_normalize(embedding);
        }
    }

    Ok(embeddings)
}

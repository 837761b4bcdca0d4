//! Encoder configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Hard ceiling applied to every configured sequence length
pub const MAX_SEQ_LEN_CEILING: usize = 512;

/// Sequence length used when the configured value is zero
pub const FALLBACK_MAX_SEQ_LEN: usize = 512;

/// Default configured sequence length
pub const DEFAULT_MAX_SEQ_LEN: usize = 256;

/// File name of the model artifact inside the model directory
pub const MODEL_FILENAME: &str = "model.onnx";

/// File name of the tokenizer artifact inside the model directory
pub const TOKENIZER_FILENAME: &str = "tokenizer.json";

/// Resolve the sequence length actually used for a batch.
///
/// Zero means "unset" and falls back to [`FALLBACK_MAX_SEQ_LEN`]; anything
/// else is clamped to [`MAX_SEQ_LEN_CEILING`].
pub fn resolve_max_len(configured: usize) -> usize {
    if configured == 0 {
        FALLBACK_MAX_SEQ_LEN
    } else {
        configured.min(MAX_SEQ_LEN_CEILING)
    }
}

/// Configuration for a single encoder.
///
/// Immutable once handed to an encoder; the encoder keeps its own copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Directory containing `model.onnx` and `tokenizer.json`
    pub model_path: PathBuf,
    /// Name of the token id input tensor
    pub input_ids_name: String,
    /// Name of the attention mask input tensor
    pub attention_mask_name: String,
    /// Name of the output tensor, e.g. `last_hidden_state` or `sentence_embedding`
    pub output_name: String,
    /// Maximum sequence length per text
    pub max_seq_len: usize,
    /// Return raw vectors without L2 normalization
    pub skip_normalize: bool,
    /// The runtime environment is shared with other encoders.
    ///
    /// When set, closing this encoder leaves the environment running and the
    /// application must shut it down once every sharing encoder is closed.
    pub shared_runtime: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::new(),
            input_ids_name: "input_ids".to_string(),
            attention_mask_name: "attention_mask".to_string(),
            output_name: "sentence_embedding".to_string(),
            max_seq_len: DEFAULT_MAX_SEQ_LEN,
            skip_normalize: false,
            shared_runtime: false,
        }
    }
}

impl EncoderConfig {
    /// Create config for a model directory with default tensor names
    pub fn with_model_dir(model_path: impl AsRef<Path>) -> Self {
        Self {
            model_path: model_path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Set the output tensor name
    pub fn with_output_name(mut self, output_name: impl Into<String>) -> Self {
        self.output_name = output_name.into();
        self
    }

    /// Set the input tensor names
    pub fn with_input_names(
        mut self,
        input_ids_name: impl Into<String>,
        attention_mask_name: impl Into<String>,
    ) -> Self {
        self.input_ids_name = input_ids_name.into();
        self.attention_mask_name = attention_mask_name.into();
        self
    }

    /// Set the maximum sequence length
    pub fn with_max_seq_len(mut self, max_seq_len: usize) -> Self {
        self.max_seq_len = max_seq_len;
        self
    }

    /// Skip (or apply) L2 normalization
    pub fn with_skip_normalize(mut self, skip: bool) -> Self {
        self.skip_normalize = skip;
        self
    }

    /// Mark the runtime environment as shared with other encoders
    pub fn with_shared_runtime(mut self, shared: bool) -> Self {
        self.shared_runtime = shared;
        self
    }

    /// Load configuration from a TOML file
    pub fn load_from_path(path: &Path) -> Result<Self> {
        info!("Loading encoder config from: {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config: EncoderConfig = toml::from_str(&content)?;
        debug!(?config, "Parsed encoder config");
        Ok(config)
    }

    /// Sequence length used for tokenization, after fallback and clamping
    pub fn effective_max_seq_len(&self) -> usize {
        resolve_max_len(self.max_seq_len)
    }

    /// Path of the model artifact
    pub fn model_file(&self) -> PathBuf {
        self.model_path.join(MODEL_FILENAME)
    }

    /// Path of the tokenizer artifact
    pub fn tokenizer_file(&self) -> PathBuf {
        self.model_path.join(TOKENIZER_FILENAME)
    }

    /// Validate the configuration
    ///
    /// Only checks the values themselves; the model directory contents are
    /// checked when an encoder is opened.
    pub fn validate(&self) -> Result<()> {
        if self.model_path.as_os_str().is_empty() {
            return Err(Error::Config("missing model path".into()));
        }

        let names = [
            ("input_ids_name", &self.input_ids_name),
            ("attention_mask_name", &self.attention_mask_name),
            ("output_name", &self.output_name),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must not be empty", field)));
            }
        }

        if self.input_ids_name == self.attention_mask_name {
            return Err(Error::Config(format!(
                "input_ids_name and attention_mask_name are both '{}'",
                self.input_ids_name
            )));
        }

        Ok(())
    }
}

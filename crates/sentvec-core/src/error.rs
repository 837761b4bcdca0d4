//! Error types for sentvec

use thiserror::Error;

/// Main error type for sentvec operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tokenization error: {0}")]
    Tokenization(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// Both the session and the runtime environment failed to tear down
    #[error("Lifecycle error: session teardown failed: {session}; environment teardown failed: {environment}")]
    Teardown { session: String, environment: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type alias for sentvec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid model path, missing artifact, unknown tensor name, bad output rank
    Configuration,
    /// The tokenizer rejected an input
    Tokenization,
    /// Tensor allocation, engine run failure or output shape mismatch
    Inference,
    /// Session or environment teardown failure
    Lifecycle,
}

impl Error {
    /// Get the category this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Io(_) | Error::Toml(_) => ErrorKind::Configuration,
            Error::Tokenization(_) => ErrorKind::Tokenization,
            Error::Inference(_) => ErrorKind::Inference,
            Error::Lifecycle(_) | Error::Teardown { .. } => ErrorKind::Lifecycle,
        }
    }

    /// Join a session teardown failure with an environment teardown failure
    ///
    /// Either side may be absent; `None` is returned only when both are.
    pub fn join_teardown(session: Option<Error>, environment: Option<Error>) -> Option<Error> {
        match (session, environment) {
            (Some(s), Some(e)) => Some(Error::Teardown {
                session: s.to_string(),
                environment: e.to_string(),
            }),
            (Some(err), None) | (None, Some(err)) => Some(err),
            (None, None) => None,
        }
    }
}

//! Runtime environment and session lifecycle
//!
//! The inference runtime environment is process-wide. It is modelled as an
//! explicit [`RuntimeEnvironment`] value that the application creates and
//! hands to its encoders, rather than a hidden singleton. Each encoder keeps
//! its bound session in a [`SessionLifecycle`] whose ownership flag decides
//! whether closing the encoder also shuts the environment down.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use sentvec_core::{Error, Result};

use crate::engine::{InferenceEngine, InferenceSession};

/// Lifecycle state of the runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Ready,
    /// Terminal
    Closed,
}

/// The process-wide inference runtime environment
pub struct RuntimeEnvironment {
    engine: Arc<dyn InferenceEngine>,
    state: Mutex<RuntimeState>,
}

impl fmt::Debug for RuntimeEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeEnvironment")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl RuntimeEnvironment {
    /// Wrap an engine; nothing is initialised until [`initialize`](Self::initialize)
    pub fn new(engine: impl InferenceEngine + 'static) -> Self {
        Self {
            engine: Arc::new(engine),
            state: Mutex::new(RuntimeState::Uninitialized),
        }
    }

    /// Environment backed by ONNX Runtime
    #[cfg(feature = "onnx")]
    pub fn onnx() -> Self {
        Self::new(crate::onnx::OnnxEngine::default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, RuntimeState>> {
        self.state
            .lock()
            .map_err(|e| Error::Lifecycle(format!("Failed to acquire runtime lock: {}", e)))
    }

    /// Current state; a poisoned lock reads as `Closed`
    pub fn state(&self) -> RuntimeState {
        self.lock().map(|s| *s).unwrap_or(RuntimeState::Closed)
    }

    /// Check if the environment is ready for sessions
    pub fn is_ready(&self) -> bool {
        self.state() == RuntimeState::Ready
    }

    /// Get the underlying inference engine
    pub fn engine(&self) -> &dyn InferenceEngine {
        self.engine.as_ref()
    }

    /// Bring the environment up. Calling this while ready is a no-op.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.lock()?;
        match *state {
            RuntimeState::Ready => Ok(()),
            RuntimeState::Closed => Err(Error::Lifecycle(
                "runtime environment has already been shut down".into(),
            )),
            RuntimeState::Uninitialized => {
                self.engine.init_environment().map_err(|e| match e {
                    Error::Lifecycle(msg) => Error::Lifecycle(msg),
                    other => Error::Lifecycle(format!("init runtime environment: {}", other)),
                })?;
                *state = RuntimeState::Ready;
                info!("Inference runtime environment ready");
                Ok(())
            }
        }
    }

    /// Tear the environment down.
    ///
    /// Must only be called after every session created under it has been
    /// destroyed. Repeated calls are no-ops. On failure the state stays
    /// `Ready` so the caller can try again.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.lock()?;
        match *state {
            RuntimeState::Closed => Ok(()),
            RuntimeState::Uninitialized => {
                *state = RuntimeState::Closed;
                Ok(())
            }
            RuntimeState::Ready => {
                self.engine.destroy_environment().map_err(|e| match e {
                    Error::Lifecycle(msg) => Error::Lifecycle(msg),
                    other => Error::Lifecycle(format!("destroy runtime environment: {}", other)),
                })?;
                *state = RuntimeState::Closed;
                info!("Inference runtime environment shut down");
                Ok(())
            }
        }
    }
}

/// A bound session plus the environment it was created under
pub struct SessionLifecycle {
    runtime: Arc<RuntimeEnvironment>,
    session: Option<Box<dyn InferenceSession>>,
    owns_runtime: bool,
}

impl fmt::Debug for SessionLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionLifecycle")
            .field("runtime", &self.runtime)
            .field("session", &self.session.is_some())
            .field("owns_runtime", &self.owns_runtime)
            .finish()
    }
}

impl SessionLifecycle {
    /// Initialise the environment if needed and bind a session to the model
    pub fn bind(
        runtime: Arc<RuntimeEnvironment>,
        model: &Path,
        input_names: &[&str],
        output_names: &[&str],
        owns_runtime: bool,
    ) -> Result<Self> {
        runtime.initialize()?;
        let session = runtime
            .engine()
            .bind_session(model, input_names, output_names)?;
        debug!(?input_names, ?output_names, "Bound inference session");

        Ok(Self {
            runtime,
            session: Some(session),
            owns_runtime,
        })
    }

    /// A lifecycle with no session yet, e.g. for an encoder that never loaded
    pub fn unbound(runtime: Arc<RuntimeEnvironment>, owns_runtime: bool) -> Self {
        Self {
            runtime,
            session: None,
            owns_runtime,
        }
    }

    /// Check if a session is currently bound
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Check if closing this lifecycle also shuts the environment down
    pub fn owns_runtime(&self) -> bool {
        self.owns_runtime
    }

    /// Get the environment this lifecycle was bound under
    pub fn runtime(&self) -> &Arc<RuntimeEnvironment> {
        &self.runtime
    }

    /// The bound session, if the encoder is usable
    pub fn session_mut(&mut self) -> Result<&mut dyn InferenceSession> {
        let session = self
            .session
            .as_deref_mut()
            .ok_or_else(|| Error::Inference("encoder not initialized".into()))?;
        if !self.runtime.is_ready() {
            return Err(Error::Inference(format!(
                "runtime environment is {:?}",
                self.runtime.state()
            )));
        }
        Ok(session)
    }

    /// Destroy the session, then shut the environment down if this lifecycle owns it.
    ///
    /// The environment teardown is attempted even when the session fails to
    /// destroy; if both fail the two errors are reported together.
    pub fn close(&mut self) -> Result<()> {
        let session_err = self.session.take().and_then(|mut session| {
            session
                .destroy()
                .err()
                .map(|e| match e {
                    Error::Lifecycle(msg) => Error::Lifecycle(msg),
                    other => Error::Lifecycle(format!("destroy session: {}", other)),
                })
                .inspect(|e| warn!("Session teardown failed: {}", e))
        });

        let env_err = if self.owns_runtime {
            self.runtime
                .shutdown()
                .err()
                .inspect(|e| warn!("Runtime teardown failed: {}", e))
        } else {
            None
        };

        match Error::join_teardown(session_err, env_err) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

//! Error types for regnet-core.

use crate::phase::Phase;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for regnet-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while provisioning an environment.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed topology, wallet or configuration input
    #[error("invalid configuration: {0}")]
    Validation(String),

    /// Error from regnet-engine
    #[error("engine error: {0}")]
    Engine(#[from] regnet_engine::EngineError),

    /// Remote command exited non-zero, could not be run, or returned
    /// nothing where output was required
    #[error("command `{exe} {args}` failed in {sandbox}: {message}")]
    Command {
        /// Sandbox the command ran in
        sandbox: String,
        /// Executable name
        exe: String,
        /// Argument string
        args: String,
        /// stderr, exit status or I/O error
        message: String,
    },

    /// Readiness deadline exceeded
    #[error("nodes not ready after {0:?}")]
    Timeout(Duration),

    /// Structured response could not be decoded
    #[error("unexpected response: {0}")]
    Parse(String),

    /// External interrupt observed
    #[error("operation cancelled")]
    Cancelled,

    /// A bootstrap phase failed
    #[error("phase {phase} failed: {source}")]
    Phase {
        /// The failing phase
        phase: Phase,
        /// What went wrong inside it
        #[source]
        source: Box<CoreError>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Attach the identity of the phase this error occurred in.
    ///
    /// Cancellation is passed through unwrapped.
    pub fn during(self, phase: Phase) -> Self {
        match self {
            CoreError::Cancelled | CoreError::Phase { .. } => self,
            other => CoreError::Phase {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// The failing phase, if this error carries one.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            CoreError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// True if this error (or the error it wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            CoreError::Cancelled => true,
            CoreError::Phase { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

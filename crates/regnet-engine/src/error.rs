//! Error types for regnet-engine.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for regnet-engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while driving the container engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine endpoint could not be reached
    #[error("failed to connect to container engine: {0}")]
    Connect(String),

    /// An engine call failed
    #[error("{operation} failed for {target}: {message}")]
    Operation {
        /// Engine operation name (e.g. `create_container`)
        operation: &'static str,
        /// Sandbox name, id or image tag the call targeted
        target: String,
        /// Message reported by the engine
        message: String,
    },

    /// Sandbox does not exist
    #[error("sandbox not found: {0}")]
    NotFound(String),

    /// A sandbox with the requested name already exists
    #[error("sandbox already exists: {0}")]
    AlreadyExists(String),

    /// A bulk operation did not finish before its deadline
    #[error("bulk operation exceeded deadline of {0:?}")]
    Deadline(Duration),

    /// Image build reported an error
    #[error("image build failed: {0}")]
    Build(String),

    /// Name filter did not compile
    #[error("invalid name filter: {0}")]
    Filter(#[from] regex::Error),

    /// I/O error (archive assembly, build context walk)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

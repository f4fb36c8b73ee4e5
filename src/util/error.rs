//! Error types for the export session.

use thiserror::Error;

/// Main error type for export operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Bad user configuration (unresolvable path, malformed pattern or script)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Reconciliation invariant violated; the current frame is aborted
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// Frame reconciled or saved out of order
    #[error("Frame out of order: expected {expected}, got {got}")]
    FrameOutOfOrder { expected: usize, got: usize },

    /// Node id does not belong to the session tree
    #[error("Unknown node: {0}")]
    UnknownNode(usize),

    /// The container writer rejected an operation
    #[error("Container error: {0}")]
    Container(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an invariant error.
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// Create a container error.
    pub fn container(msg: impl Into<String>) -> Self {
        Self::Container(msg.into())
    }
}

/// Result type alias for export operations.
pub type Result<T> = std::result::Result<T, Error>;

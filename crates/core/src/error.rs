//! Engine error types.

use thiserror::Error;

/// Errors surfaced by table operations, the write pipeline, and persistence.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Embedding length differs from the table's fixed dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimMismatch { expected: usize, got: usize },

    /// The write pipeline has been stopped; no further tasks are accepted.
    #[error("write queue is closed")]
    QueueClosed,

    /// A snapshot or sidecar failed integrity or shape checks.
    #[error("corrupt snapshot: {0}")]
    Corrupt(String),

    /// Underlying I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

//! Engine error types.

use thiserror::Error;

/// Engine error type.
///
/// Transport failures never surface here; the delivery processor classifies
/// them internally and callers only observe queue depth and the response
/// sink.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] hit_store::StoreError),

    /// Record serialization error
    #[error("Record serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Engine task is gone
    #[error("Engine channel closed")]
    ChannelClosed,
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

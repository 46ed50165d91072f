//! Projection error types.

use store::StoreError;
use thiserror::Error;

/// Errors that can occur while projecting events.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Failed to decode an event payload or a stored read-model row.
    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    /// Two projectors were registered under the same name.
    #[error("Projector {0} is already registered")]
    DuplicateProjector(&'static str),

    /// A projector-specific failure.
    #[error("Projection error: {0}")]
    Projection(String),
}

impl From<sqlx::Error> for ProjectionError {
    fn from(err: sqlx::Error) -> Self {
        ProjectionError::Store(err.into())
    }
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

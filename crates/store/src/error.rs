use common::EdgeError;
use thiserror::Error;

/// Errors raised by transactions and storage adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A guarded write found a different version than the caller expected.
    /// A version of 0 means "row absent".
    #[error("Write conflict on {table}/{key}: expected version {expected}, found {actual}")]
    VersionConflict {
        table: String,
        key: String,
        expected: i64,
        actual: i64,
    },

    /// The transaction handle was used after commit or rollback.
    #[error("Transaction already closed")]
    TransactionClosed,

    /// An envelope could not be built or stored.
    #[error("Invalid event envelope: {0}")]
    InvalidEnvelope(&'static str),

    /// The backing store is unreachable or refused the operation.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

impl From<StoreError> for EdgeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { .. } => EdgeError::conflict(err.to_string()),
            other => EdgeError::infrastructure(other.to_string()),
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

use common::EdgeError;
use store::StoreError;
use thiserror::Error;

/// Errors raised while claiming or completing an idempotency record.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The key was already used for the same command with another payload.
    #[error("Idempotency key '{key}' was already used for {command} with a different payload")]
    PayloadMismatch { key: String, command: String },

    /// A response was saved for a record that was never claimed.
    #[error("No idempotency claim for key '{key}' on {command}")]
    NotClaimed { key: String, command: String },

    /// A response was saved for a record that already holds one.
    #[error("Idempotency key '{key}' on {command} already has a response")]
    AlreadyCompleted { key: String, command: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for IdempotencyError {
    fn from(err: sqlx::Error) -> Self {
        IdempotencyError::Store(err.into())
    }
}

impl From<IdempotencyError> for EdgeError {
    fn from(err: IdempotencyError) -> Self {
        match err {
            IdempotencyError::PayloadMismatch { .. } => EdgeError::bad_request(err.to_string()),
            IdempotencyError::Store(store) => store.into(),
            IdempotencyError::NotClaimed { .. }
            | IdempotencyError::AlreadyCompleted { .. }
            | IdempotencyError::Serialization(_) => {
                EdgeError::infrastructure(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::EdgeErrorKind;

    #[test]
    fn payload_mismatch_is_a_bad_request() {
        let err = IdempotencyError::PayloadMismatch {
            key: "k-1".into(),
            command: "asset.create".into(),
        };
        assert_eq!(EdgeError::from(err).kind(), EdgeErrorKind::BadRequest);
    }

    #[test]
    fn store_conflicts_stay_conflicts() {
        let err = IdempotencyError::Store(StoreError::VersionConflict {
            table: "idempotency_keys".into(),
            key: "k-1".into(),
            expected: 0,
            actual: 1,
        });
        assert_eq!(EdgeError::from(err).kind(), EdgeErrorKind::Conflict);
    }
}

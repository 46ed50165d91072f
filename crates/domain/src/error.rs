//! Domain error types.

use common::{AggregateId, EdgeError, Violation};
use store::{StoreError, Version};
use thiserror::Error;

/// One or more business rules rejected a command.
///
/// Every violated rule is reported, not just the first one found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} invariant(s) violated: {}", .violations.len(), keys(.violations))]
pub struct InvariantViolation {
    violations: Vec<Violation>,
}

fn keys(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.key.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl InvariantViolation {
    pub fn single(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![Violation::new(key, message)],
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// Returns true if a violation with this key was recorded.
    pub fn has(&self, key: &str) -> bool {
        self.violations.iter().any(|v| v.key == key)
    }

    pub fn into_violations(self) -> Vec<Violation> {
        self.violations
    }
}

/// Collects rule checks and fails once with all of them.
///
/// ```
/// use domain::InvariantCheck;
///
/// let mut check = InvariantCheck::new();
/// check.ensure(false, "name_required", "asset name is required");
/// check.ensure(true, "amount_negative", "amount must not be negative");
/// let err = check.finish().unwrap_err();
/// assert!(err.has("name_required"));
/// assert_eq!(err.violations().len(), 1);
/// ```
#[derive(Debug, Default)]
#[must_use = "call finish() to surface collected violations"]
pub struct InvariantCheck {
    violations: Vec<Violation>,
}

impl InvariantCheck {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a violation unless `holds` is true.
    pub fn ensure(
        &mut self,
        holds: bool,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> &mut Self {
        if !holds {
            self.violations.push(Violation::new(key, message));
        }
        self
    }

    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn finish(self) -> Result<(), InvariantViolation> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(InvariantViolation {
                violations: self.violations,
            })
        }
    }

    /// Like [`finish`](Self::finish), with one more rule: `value` must be
    /// present. Returns it when every rule held.
    pub fn finish_with<T>(
        mut self,
        value: Option<T>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<T, InvariantViolation> {
        match value {
            Some(value) => self.finish().map(|()| value),
            None => {
                self.violations.push(Violation::new(key, message));
                Err(InvariantViolation {
                    violations: self.violations,
                })
            }
        }
    }
}

/// Why a command refused to produce a new state.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),

    /// The payload did not match the command's expected shape.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// A mutation command was invoked without a target aggregate.
    #[error("Command requires an existing aggregate")]
    AggregateRequired,

    /// A creation command was invoked against an existing aggregate.
    #[error("Command creates an aggregate and cannot target an existing one")]
    AggregateExists,

    /// The command rejected the request with an explicit edge error.
    #[error(transparent)]
    Rejected(EdgeError),

    #[error("Response encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl From<CommandError> for EdgeError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Invariant(violation) => {
                EdgeError::invariant(violation.into_violations())
            }
            CommandError::InvalidPayload(_)
            | CommandError::AggregateRequired
            | CommandError::AggregateExists => EdgeError::bad_request(err.to_string()),
            CommandError::Rejected(edge) => edge,
            CommandError::Encoding(_) => EdgeError::infrastructure(err.to_string()),
        }
    }
}

/// Errors raised while loading or saving aggregates.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The stored version no longer matches the one the aggregate was loaded at.
    #[error(
        "Concurrency conflict for {aggregate_type} {aggregate_id}: expected version {expected}, found {actual}"
    )]
    Conflict {
        aggregate_type: &'static str,
        aggregate_id: AggregateId,
        expected: Version,
        actual: Version,
    },

    /// A stored event could not be mapped back onto the aggregate's events.
    #[error("Unknown event {event_type} for {aggregate_type}: {reason}")]
    UnknownEvent {
        aggregate_type: &'static str,
        event_type: String,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RepositoryError> for EdgeError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Conflict { .. } => EdgeError::conflict(err.to_string()),
            RepositoryError::Store(store) => store.into(),
            RepositoryError::UnknownEvent { .. } | RepositoryError::Serialization(_) => {
                EdgeError::infrastructure(err.to_string())
            }
        }
    }
}

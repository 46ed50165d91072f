//! Edge-facing error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single broken business rule: a stable machine key plus a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub key: String,
    pub message: String,
}

impl Violation {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.key, self.message)
    }
}

/// Every failed command surfaces as exactly one of these.
///
/// Callers branch on the kind: `Conflict` and `Infrastructure` are worth
/// retrying, `BadRequest` and `InvariantViolation` need different input,
/// `Unauthorized` and `NotFound` are final.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeError {
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Bad request: {message}")]
    BadRequest { message: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Invariant violation: {}", join_violations(.violations))]
    InvariantViolation { violations: Vec<Violation> },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Infrastructure failure: {message}")]
    Infrastructure { message: String },
}

/// Discriminant of [`EdgeError`], handy for metrics labels and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeErrorKind {
    Unauthorized,
    BadRequest,
    NotFound,
    InvariantViolation,
    Conflict,
    Infrastructure,
}

impl EdgeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeErrorKind::Unauthorized => "unauthorized",
            EdgeErrorKind::BadRequest => "bad_request",
            EdgeErrorKind::NotFound => "not_found",
            EdgeErrorKind::InvariantViolation => "invariant_violation",
            EdgeErrorKind::Conflict => "conflict",
            EdgeErrorKind::Infrastructure => "infrastructure",
        }
    }
}

impl fmt::Display for EdgeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EdgeError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn infrastructure(message: impl Into<String>) -> Self {
        Self::Infrastructure {
            message: message.into(),
        }
    }

    pub fn invariant(violations: Vec<Violation>) -> Self {
        Self::InvariantViolation { violations }
    }

    pub fn kind(&self) -> EdgeErrorKind {
        match self {
            EdgeError::Unauthorized { .. } => EdgeErrorKind::Unauthorized,
            EdgeError::BadRequest { .. } => EdgeErrorKind::BadRequest,
            EdgeError::NotFound { .. } => EdgeErrorKind::NotFound,
            EdgeError::InvariantViolation { .. } => EdgeErrorKind::InvariantViolation,
            EdgeError::Conflict { .. } => EdgeErrorKind::Conflict,
            EdgeError::Infrastructure { .. } => EdgeErrorKind::Infrastructure,
        }
    }

    /// Returns true when resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EdgeError::Conflict { .. } | EdgeError::Infrastructure { .. }
        )
    }

    /// Violations carried by an `InvariantViolation`, empty otherwise.
    pub fn violations(&self) -> &[Violation] {
        match self {
            EdgeError::InvariantViolation { violations } => violations,
            _ => &[],
        }
    }
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

//! Demo-level errors.

use common::EdgeError;
use store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DemoError {
    /// Connecting to or migrating the database failed.
    #[error("Database setup failed: {0}")]
    Database(#[from] StoreError),

    /// A scripted command failed with an unexpected error.
    #[error("Step '{step}' failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: EdgeError,
    },

    /// A scripted command succeeded or failed differently than scripted.
    #[error("Step '{step}' diverged: {detail}")]
    Unexpected { step: &'static str, detail: String },

    #[error("Metrics recorder could not be installed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
}

impl From<sqlx::Error> for DemoError {
    fn from(err: sqlx::Error) -> Self {
        DemoError::Database(err.into())
    }
}

/// Tags a command error with the scenario step that produced it.
pub trait StepContext<T> {
    fn step(self, step: &'static str) -> Result<T, DemoError>;
}

impl<T> StepContext<T> for Result<T, EdgeError> {
    fn step(self, step: &'static str) -> Result<T, DemoError> {
        self.map_err(|source| DemoError::Step { step, source })
    }
}

//! Runs work at most once per idempotency key.

use std::future::Future;
use std::sync::Arc;

use common::{Clock, EdgeError, SystemClock};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use store::{UnitOfWork, with_transaction};

use crate::claim::{ClaimOutcome, ClaimRequest, IdempotencyStore};
use crate::hash::stable_hash;

/// One request to run idempotently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdempotencyRequest {
    /// Client-supplied key; `None` runs the work without deduplication.
    #[serde(default)]
    pub key: Option<String>,
    pub command: String,
    /// Whatever partitions the key space: tenant, user, aggregate id...
    #[serde(default)]
    pub scope: Value,
    #[serde(default)]
    pub payload: Value,
}

impl IdempotencyRequest {
    pub fn new(command: impl Into<String>, payload: Value) -> Self {
        Self {
            key: None,
            command: command.into(),
            scope: Value::Null,
            payload,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_scope(mut self, scope: Value) -> Self {
        self.scope = scope;
        self
    }
}

/// Wraps a unit of work so that work submitted under the same key, command
/// and scope runs once and later submissions get the first response back.
///
/// The claim, the work and the stored response share one transaction, so a
/// failed run leaves nothing behind and can be retried with the same key.
pub struct IdempotentExecutor<U: UnitOfWork> {
    uow: Arc<U>,
    store: Arc<dyn IdempotencyStore<U::Tx>>,
    clock: Arc<dyn Clock>,
}

impl<U: UnitOfWork> IdempotentExecutor<U> {
    pub fn new(uow: Arc<U>, store: Arc<dyn IdempotencyStore<U::Tx>>) -> Self {
        Self {
            uow,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[tracing::instrument(skip(self, request, run), fields(command = %request.command, key = ?request.key))]
    pub async fn execute<T, F, Fut>(
        &self,
        request: IdempotencyRequest,
        run: F,
    ) -> Result<T, EdgeError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(U::Tx) -> Fut,
        Fut: Future<Output = Result<T, EdgeError>>,
    {
        let Some(key) = request.key else {
            record("bypassed");
            return with_transaction(self.uow.as_ref(), run).await;
        };

        let claim = ClaimRequest {
            key,
            command: request.command,
            scope_hash: stable_hash(&request.scope),
            payload_hash: stable_hash(&request.payload),
            now: self.clock.now(),
        };

        with_transaction(self.uow.as_ref(), |tx| async move {
            match self.store.try_claim(&tx, &claim).await? {
                ClaimOutcome::Replay(response) => {
                    record("replayed");
                    tracing::info!("replaying stored response");
                    serde_json::from_value(response).map_err(|e| {
                        EdgeError::infrastructure(format!("Stored response is unreadable: {e}"))
                    })
                }
                ClaimOutcome::InFlight { lease_expires_at } => {
                    record("in_flight");
                    tracing::warn!(%lease_expires_at, "request already in progress");
                    Err(EdgeError::conflict(format!(
                        "Request with idempotency key '{}' is in progress",
                        claim.key
                    )))
                }
                ClaimOutcome::Claimed => {
                    record("claimed");
                    let output = run(tx.clone()).await?;
                    let response = serde_json::to_value(&output).map_err(|e| {
                        EdgeError::infrastructure(format!("Response is not serializable: {e}"))
                    })?;
                    self.store
                        .save_response(&tx, &claim.record_key(), &response, self.clock.now())
                        .await?;
                    Ok(output)
                }
            }
        })
        .await
    }
}

fn record(outcome: &'static str) {
    metrics::counter!("kernel_idempotency_total", "outcome" => outcome).increment(1);
}

//! Idempotency records in the in-memory unit of work.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use store::MemoryTx;

use crate::claim::{
    ClaimOutcome, ClaimRequest, DEFAULT_LEASE_SECS, IdempotencyRecord, IdempotencyStore,
    RecordKey,
};
use crate::error::IdempotencyError;

pub const TABLE: &str = "idempotency_keys";

/// Stores records as rows of [`TABLE`], so claims share the command's
/// transaction and the store's commit-time version checks.
#[derive(Debug, Clone)]
pub struct InMemoryIdempotencyStore {
    lease: Duration,
}

impl InMemoryIdempotencyStore {
    pub fn new(lease: Duration) -> Self {
        Self { lease }
    }
}

impl Default for InMemoryIdempotencyStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_LEASE_SECS))
    }
}

fn row_key(key: &str, command: &str, scope_hash: &str) -> String {
    format!("{command}/{scope_hash}/{key}")
}

#[async_trait]
impl IdempotencyStore<MemoryTx> for InMemoryIdempotencyStore {
    async fn try_claim(
        &self,
        tx: &MemoryTx,
        request: &ClaimRequest,
    ) -> Result<ClaimOutcome, IdempotencyError> {
        let row_key = row_key(&request.key, &request.command, &request.scope_hash);
        let placeholder = serde_json::to_value(IdempotencyRecord::placeholder(request, self.lease))?;

        let Some(row) = tx.get(TABLE, &row_key).await? else {
            tx.insert(TABLE, &row_key, placeholder).await?;
            return Ok(ClaimOutcome::Claimed);
        };

        let existing: IdempotencyRecord = serde_json::from_value(row.value)?;
        if let Some(outcome) = existing.outcome_for(request)? {
            return Ok(outcome);
        }

        tracing::info!(key = %request.key, command = %request.command, "taking over expired idempotency claim");
        tx.update(TABLE, &row_key, placeholder, row.version).await?;
        Ok(ClaimOutcome::Claimed)
    }

    async fn save_response(
        &self,
        tx: &MemoryTx,
        record: &RecordKey,
        response: &Value,
        completed_at: DateTime<Utc>,
    ) -> Result<(), IdempotencyError> {
        let row_key = row_key(&record.key, &record.command, &record.scope_hash);
        let Some(row) = tx.get(TABLE, &row_key).await? else {
            return Err(IdempotencyError::NotClaimed {
                key: record.key.clone(),
                command: record.command.clone(),
            });
        };

        let mut stored: IdempotencyRecord = serde_json::from_value(row.value)?;
        if stored.is_completed() {
            return Err(IdempotencyError::AlreadyCompleted {
                key: record.key.clone(),
                command: record.command.clone(),
            });
        }
        stored.complete(response.clone(), completed_at);
        tx.update(TABLE, &row_key, serde_json::to_value(&stored)?, row.version)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use store::{InMemoryUnitOfWork, StoreError, UnitOfWork};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn claim(now: DateTime<Utc>) -> ClaimRequest {
        ClaimRequest {
            key: "k-1".into(),
            command: "asset.create".into(),
            scope_hash: "scope".into(),
            payload_hash: "payload".into(),
            now,
        }
    }

    #[tokio::test]
    async fn first_claim_wins_and_completed_record_replays() {
        let uow = InMemoryUnitOfWork::new();
        let idem = InMemoryIdempotencyStore::default();

        let tx = uow.begin().await.unwrap();
        assert_eq!(idem.try_claim(&tx, &claim(t0())).await.unwrap(), ClaimOutcome::Claimed);
        idem.save_response(&tx, &claim(t0()).record_key(), &json!({"ok": true}), t0())
            .await
            .unwrap();
        uow.commit(tx).await.unwrap();

        let tx = uow.begin().await.unwrap();
        assert_eq!(
            idem.try_claim(&tx, &claim(t0())).await.unwrap(),
            ClaimOutcome::Replay(json!({"ok": true}))
        );
    }

    #[tokio::test]
    async fn rolled_back_claim_leaves_no_record() {
        let uow = InMemoryUnitOfWork::new();
        let idem = InMemoryIdempotencyStore::default();

        let tx = uow.begin().await.unwrap();
        idem.try_claim(&tx, &claim(t0())).await.unwrap();
        uow.rollback(tx).await.unwrap();

        assert!(uow.rows(TABLE).await.is_empty());
        let tx = uow.begin().await.unwrap();
        assert_eq!(idem.try_claim(&tx, &claim(t0())).await.unwrap(), ClaimOutcome::Claimed);
    }

    #[tokio::test]
    async fn committed_placeholder_is_in_flight_until_lease_expires() {
        let uow = InMemoryUnitOfWork::new();
        let idem = InMemoryIdempotencyStore::new(Duration::seconds(10));

        let tx = uow.begin().await.unwrap();
        idem.try_claim(&tx, &claim(t0())).await.unwrap();
        uow.commit(tx).await.unwrap();

        let tx = uow.begin().await.unwrap();
        assert!(matches!(
            idem.try_claim(&tx, &claim(t0() + Duration::seconds(5))).await.unwrap(),
            ClaimOutcome::InFlight { .. }
        ));
        assert_eq!(
            idem.try_claim(&tx, &claim(t0() + Duration::seconds(11)))
                .await
                .unwrap(),
            ClaimOutcome::Claimed
        );
        uow.commit(tx).await.unwrap();

        let rows = uow.rows(TABLE).await;
        let row = &rows[0].1;
        assert_eq!(row.version, 2);
        assert_eq!(row.value["claimed_at"], json!(t0() + Duration::seconds(11)));
    }

    #[tokio::test]
    async fn concurrent_claims_let_one_commit() {
        let uow = InMemoryUnitOfWork::new();
        let idem = InMemoryIdempotencyStore::default();

        let first = uow.begin().await.unwrap();
        let second = uow.begin().await.unwrap();
        assert_eq!(idem.try_claim(&first, &claim(t0())).await.unwrap(), ClaimOutcome::Claimed);
        assert_eq!(idem.try_claim(&second, &claim(t0())).await.unwrap(), ClaimOutcome::Claimed);

        uow.commit(first).await.unwrap();
        let err = uow.commit(second).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn null_response_replays_after_commit() {
        let uow = InMemoryUnitOfWork::new();
        let idem = InMemoryIdempotencyStore::new(Duration::seconds(10));

        let tx = uow.begin().await.unwrap();
        idem.try_claim(&tx, &claim(t0())).await.unwrap();
        idem.save_response(&tx, &claim(t0()).record_key(), &Value::Null, t0())
            .await
            .unwrap();
        uow.commit(tx).await.unwrap();

        let tx = uow.begin().await.unwrap();
        for later in [t0(), t0() + Duration::days(1)] {
            assert_eq!(
                idem.try_claim(&tx, &claim(later)).await.unwrap(),
                ClaimOutcome::Replay(Value::Null)
            );
        }
    }

    #[tokio::test]
    async fn completed_record_refuses_a_second_response() {
        let uow = InMemoryUnitOfWork::new();
        let idem = InMemoryIdempotencyStore::default();
        let key = claim(t0()).record_key();

        let tx = uow.begin().await.unwrap();
        idem.try_claim(&tx, &claim(t0())).await.unwrap();
        idem.save_response(&tx, &key, &json!("first"), t0())
            .await
            .unwrap();
        uow.commit(tx).await.unwrap();

        let tx = uow.begin().await.unwrap();
        let err = idem
            .save_response(&tx, &key, &json!("second"), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, IdempotencyError::AlreadyCompleted { .. }));
        assert_eq!(
            idem.try_claim(&tx, &claim(t0())).await.unwrap(),
            ClaimOutcome::Replay(json!("first"))
        );
    }

    #[tokio::test]
    async fn saving_without_claim_fails() {
        let uow = InMemoryUnitOfWork::new();
        let idem = InMemoryIdempotencyStore::default();
        let tx = uow.begin().await.unwrap();

        let err = idem
            .save_response(&tx, &claim(t0()).record_key(), &json!(null), t0())
            .await
            .unwrap_err();
        assert!(matches!(err, IdempotencyError::NotClaimed { .. }));
    }
}

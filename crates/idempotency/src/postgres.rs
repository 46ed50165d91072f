//! Idempotency records in PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sqlx::Row;
use store::PgTx;

use crate::claim::{
    ClaimOutcome, ClaimRequest, DEFAULT_LEASE_SECS, IdempotencyRecord, IdempotencyStore,
    RecordKey,
};
use crate::error::IdempotencyError;

/// Claims rows of `idempotency_keys` inside the command's transaction.
///
/// The insert relies on the primary key: a concurrent claimer blocks on the
/// uncommitted row and then sees it, committed or gone.
#[derive(Debug, Clone)]
pub struct PostgresIdempotencyStore {
    lease: Duration,
}

impl PostgresIdempotencyStore {
    pub fn new(lease: Duration) -> Self {
        Self { lease }
    }
}

impl Default for PostgresIdempotencyStore {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_LEASE_SECS))
    }
}

#[async_trait]
impl IdempotencyStore<PgTx> for PostgresIdempotencyStore {
    async fn try_claim(
        &self,
        tx: &PgTx,
        request: &ClaimRequest,
    ) -> Result<ClaimOutcome, IdempotencyError> {
        let placeholder = IdempotencyRecord::placeholder(request, self.lease);
        let mut conn = tx.conn().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (key, command, scope_hash, payload_hash, claimed_at, lease_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (key, command, scope_hash) DO NOTHING
            "#,
        )
        .bind(&request.key)
        .bind(&request.command)
        .bind(&request.scope_hash)
        .bind(&request.payload_hash)
        .bind(placeholder.claimed_at)
        .bind(placeholder.lease_expires_at)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(ClaimOutcome::Claimed);
        }

        let row = sqlx::query(
            r#"
            SELECT payload_hash, response, claimed_at, lease_expires_at, completed_at
            FROM idempotency_keys
            WHERE key = $1 AND command = $2 AND scope_hash = $3
            FOR UPDATE
            "#,
        )
        .bind(&request.key)
        .bind(&request.command)
        .bind(&request.scope_hash)
        .fetch_one(&mut *conn)
        .await?;

        let existing = IdempotencyRecord {
            key: request.key.clone(),
            command: request.command.clone(),
            scope_hash: request.scope_hash.clone(),
            payload_hash: row.try_get("payload_hash")?,
            response: row.try_get("response")?,
            claimed_at: row.try_get("claimed_at")?,
            lease_expires_at: row.try_get("lease_expires_at")?,
            completed_at: row.try_get("completed_at")?,
        };
        if let Some(outcome) = existing.outcome_for(request)? {
            return Ok(outcome);
        }

        tracing::info!(key = %request.key, command = %request.command, "taking over expired idempotency claim");
        sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET claimed_at = $4, lease_expires_at = $5, response = NULL, completed_at = NULL
            WHERE key = $1 AND command = $2 AND scope_hash = $3
            "#,
        )
        .bind(&request.key)
        .bind(&request.command)
        .bind(&request.scope_hash)
        .bind(placeholder.claimed_at)
        .bind(placeholder.lease_expires_at)
        .execute(&mut *conn)
        .await?;

        Ok(ClaimOutcome::Claimed)
    }

    async fn save_response(
        &self,
        tx: &PgTx,
        record: &RecordKey,
        response: &Value,
        completed_at: DateTime<Utc>,
    ) -> Result<(), IdempotencyError> {
        let mut conn = tx.conn().await?;
        let updated = sqlx::query(
            r#"
            UPDATE idempotency_keys
            SET response = $4, completed_at = $5
            WHERE key = $1 AND command = $2 AND scope_hash = $3 AND completed_at IS NULL
            "#,
        )
        .bind(&record.key)
        .bind(&record.command)
        .bind(&record.scope_hash)
        .bind(response)
        .bind(completed_at)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(());
        }

        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM idempotency_keys
                WHERE key = $1 AND command = $2 AND scope_hash = $3
            )
            "#,
        )
        .bind(&record.key)
        .bind(&record.command)
        .bind(&record.scope_hash)
        .fetch_one(&mut *conn)
        .await?;

        let (key, command) = (record.key.clone(), record.command.clone());
        Err(if exists {
            IdempotencyError::AlreadyCompleted { key, command }
        } else {
            IdempotencyError::NotClaimed { key, command }
        })
    }
}

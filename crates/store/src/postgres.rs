//! PostgreSQL unit of work.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use uuid::Uuid;

use crate::{
    AggregateId, EventEnvelope, EventId, EventMeta, Result, StoreError, Version,
    uow::UnitOfWork,
};

/// PostgreSQL-backed unit of work.
#[derive(Clone)]
pub struct PostgresUnitOfWork {
    pool: PgPool,
}

impl PostgresUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Shared handle to one open database transaction.
#[derive(Clone)]
pub struct PgTx {
    inner: Arc<Mutex<Option<Transaction<'static, Postgres>>>>,
}

impl PgTx {
    /// Locks the transaction's connection for one statement or a short
    /// sequence of them.
    pub async fn conn(&self) -> Result<MappedMutexGuard<'_, PgConnection>> {
        let guard = self.inner.lock().await;
        MutexGuard::try_map(guard, |slot| slot.as_deref_mut())
            .map_err(|_| StoreError::TransactionClosed)
    }

    async fn take(&self) -> Result<Transaction<'static, Postgres>> {
        self.inner
            .lock()
            .await
            .take()
            .ok_or(StoreError::TransactionClosed)
    }

    /// Appends events inside this transaction.
    pub async fn append_events(&self, events: &[EventEnvelope]) -> Result<()> {
        let mut conn = self.conn().await?;
        for event in events {
            let context = serde_json::to_value(&event.meta.context)?;
            sqlx::query(
                r#"
                INSERT INTO events (id, aggregate_type, aggregate_id, version, sequence, event_type, schema_version, timestamp, data, context)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(event.event_id.as_uuid())
            .bind(&event.aggregate_type)
            .bind(event.aggregate_id.as_str())
            .bind(event.version.as_i64())
            .bind(to_db_int(event.sequence, "sequence out of range")?)
            .bind(&event.event_type)
            .bind(to_db_int(event.meta.schema_version, "schema_version out of range")?)
            .bind(event.meta.timestamp)
            .bind(&event.data)
            .bind(context)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }

    /// Returns one aggregate's events in order.
    pub async fn events_for(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<EventEnvelope>> {
        let mut conn = self.conn().await?;
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_type, aggregate_id, version, sequence, event_type, schema_version, timestamp, data, context
            FROM events
            WHERE aggregate_type = $1 AND aggregate_id = $2
            ORDER BY version ASC, sequence ASC
            "#,
        )
        .bind(aggregate_type)
        .bind(aggregate_id)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter().map(row_to_event).collect()
    }
}

fn to_db_int(value: u32, what: &'static str) -> Result<i32> {
    i32::try_from(value).map_err(|_| StoreError::InvalidEnvelope(what))
}

fn from_db_int(value: i32, what: &'static str) -> Result<u32> {
    u32::try_from(value).map_err(|_| StoreError::InvalidEnvelope(what))
}

fn row_to_event(row: PgRow) -> Result<EventEnvelope> {
    let context: serde_json::Value = row.try_get("context")?;
    let aggregate_id: String = row.try_get("aggregate_id")?;

    Ok(EventEnvelope {
        event_id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        event_type: row.try_get("event_type")?,
        aggregate_id: AggregateId::parse(aggregate_id)
            .map_err(|_| StoreError::InvalidEnvelope("empty aggregate_id"))?,
        aggregate_type: row.try_get("aggregate_type")?,
        version: Version::new(row.try_get("version")?),
        sequence: from_db_int(row.try_get("sequence")?, "negative sequence")?,
        data: row.try_get("data")?,
        meta: EventMeta {
            schema_version: from_db_int(row.try_get("schema_version")?, "negative schema_version")?,
            timestamp: row.try_get("timestamp")?,
            context: serde_json::from_value(context)?,
        },
    })
}

#[async_trait]
impl UnitOfWork for PostgresUnitOfWork {
    type Tx = PgTx;

    async fn begin(&self) -> Result<PgTx> {
        let tx = self.pool.begin().await?;
        Ok(PgTx {
            inner: Arc::new(Mutex::new(Some(tx))),
        })
    }

    async fn commit(&self, tx: PgTx) -> Result<()> {
        tx.take().await?.commit().await.map_err(|e| {
            // Serialization failures and unique violations raised at commit
            // time are lost races, not outages.
            if let sqlx::Error::Database(ref db) = e
                && matches!(db.code().as_deref(), Some("40001") | Some("23505"))
            {
                return StoreError::VersionConflict {
                    table: "transaction".to_string(),
                    key: db.constraint().unwrap_or_default().to_string(),
                    expected: 0,
                    actual: 0,
                };
            }
            StoreError::Database(e)
        })
    }

    async fn rollback(&self, tx: PgTx) -> Result<()> {
        tx.take().await?.rollback().await?;
        Ok(())
    }
}

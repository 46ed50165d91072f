use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, Clock, SystemClock};
use serde::{Serialize, de::DeserializeOwned};
use sqlx::Row;
use store::{EventEnvelope, PgTx, Version};

use super::{AggregateRepository, build_envelopes};
use crate::aggregate::Aggregate;
use crate::error::RepositoryError;

/// Document-per-aggregate repository over the `aggregates` table.
pub struct PostgresStateRepository<A> {
    clock: Arc<dyn Clock>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> PostgresStateRepository<A> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            _aggregate: PhantomData,
        }
    }
}

impl<A> Default for PostgresStateRepository<A> {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl<A: Aggregate> PostgresStateRepository<A> {
    async fn stored_version(&self, tx: &PgTx, id: &AggregateId) -> Result<Version, RepositoryError> {
        let mut conn = tx.conn().await?;
        let version: Option<i64> = sqlx::query_scalar(
            "SELECT version FROM aggregates WHERE aggregate_type = $1 AND aggregate_id = $2",
        )
        .bind(A::aggregate_type())
        .bind(id.as_str())
        .fetch_optional(&mut *conn)
        .await
        .map_err(store::StoreError::from)?;
        Ok(Version::new(version.unwrap_or(0)))
    }
}

#[async_trait]
impl<A> AggregateRepository<A, PgTx> for PostgresStateRepository<A>
where
    A: Aggregate + Serialize + DeserializeOwned,
{
    async fn find_by_id(&self, tx: &PgTx, id: &AggregateId) -> Result<Option<A>, RepositoryError> {
        let row = {
            let mut conn = tx.conn().await?;
            sqlx::query(
                "SELECT version, state FROM aggregates WHERE aggregate_type = $1 AND aggregate_id = $2",
            )
            .bind(A::aggregate_type())
            .bind(id.as_str())
            .fetch_optional(&mut *conn)
            .await
            .map_err(store::StoreError::from)?
        };

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row.try_get("version").map_err(store::StoreError::from)?;
        let state: serde_json::Value = row.try_get("state").map_err(store::StoreError::from)?;

        let mut aggregate: A = serde_json::from_value(state)?;
        aggregate.root_mut().set_version(Version::new(version));
        Ok(Some(aggregate))
    }

    #[tracing::instrument(skip_all, fields(aggregate_type = A::aggregate_type(), aggregate_id = %aggregate.id()))]
    async fn save(&self, tx: &PgTx, aggregate: &mut A) -> Result<Vec<EventEnvelope>, RepositoryError> {
        let id = aggregate.id().clone();
        let expected = aggregate.version();
        let next = expected.next();
        let document = serde_json::to_value(&*aggregate)?;

        let affected = {
            let mut conn = tx.conn().await?;
            let result = if expected.is_initial() {
                sqlx::query(
                    r#"
                    INSERT INTO aggregates (aggregate_type, aggregate_id, version, state)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (aggregate_type, aggregate_id) DO NOTHING
                    "#,
                )
                .bind(A::aggregate_type())
                .bind(id.as_str())
                .bind(next.as_i64())
                .bind(&document)
                .execute(&mut *conn)
                .await
            } else {
                sqlx::query(
                    r#"
                    UPDATE aggregates
                    SET version = $4, state = $5, updated_at = NOW()
                    WHERE aggregate_type = $1 AND aggregate_id = $2 AND version = $3
                    "#,
                )
                .bind(A::aggregate_type())
                .bind(id.as_str())
                .bind(expected.as_i64())
                .bind(next.as_i64())
                .bind(&document)
                .execute(&mut *conn)
                .await
            };
            result.map_err(store::StoreError::from)?.rows_affected()
        };

        if affected == 0 {
            let actual = self.stored_version(tx, &id).await?;
            return Err(RepositoryError::Conflict {
                aggregate_type: A::aggregate_type(),
                aggregate_id: id,
                expected,
                actual,
            });
        }

        let envelopes =
            build_envelopes::<A>(&id, next, aggregate.root().pending(), self.clock.now())?;
        tx.append_events(&envelopes).await?;
        aggregate.mark_saved(next);
        Ok(envelopes)
    }
}

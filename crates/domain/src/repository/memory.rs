//! Repositories over the in-memory unit of work.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use common::{AggregateId, Clock, SystemClock};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use store::{EventEnvelope, MemoryTx, Version};

use super::{AggregateRepository, build_envelopes, decode_events, write_conflict};
use crate::aggregate::{Aggregate, EventSourced};
use crate::error::RepositoryError;

/// Stores each aggregate as one JSON document, child collections included.
///
/// Every save rewrites the whole document; the emitted events go to the
/// event log in the same transaction.
pub struct StateRepository<A> {
    clock: Arc<dyn Clock>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> StateRepository<A> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            _aggregate: PhantomData,
        }
    }
}

impl<A> Default for StateRepository<A> {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl<A> AggregateRepository<A, MemoryTx> for StateRepository<A>
where
    A: Aggregate + Serialize + DeserializeOwned,
{
    async fn find_by_id(
        &self,
        tx: &MemoryTx,
        id: &AggregateId,
    ) -> Result<Option<A>, RepositoryError> {
        let Some(row) = tx.get(A::aggregate_type(), id.as_str()).await? else {
            return Ok(None);
        };
        let mut aggregate: A = serde_json::from_value(row.value)?;
        aggregate.root_mut().set_version(Version::new(row.version));
        Ok(Some(aggregate))
    }

    #[tracing::instrument(skip_all, fields(aggregate_type = A::aggregate_type(), aggregate_id = %aggregate.id()))]
    async fn save(
        &self,
        tx: &MemoryTx,
        aggregate: &mut A,
    ) -> Result<Vec<EventEnvelope>, RepositoryError> {
        let id = aggregate.id().clone();
        let expected = aggregate.version();
        let document = serde_json::to_value(&*aggregate)?;

        let table = A::aggregate_type();
        let written = if expected.is_initial() {
            tx.insert(table, id.as_str(), document).await
        } else {
            tx.update(table, id.as_str(), document, expected.as_i64())
                .await
        };
        let version = Version::new(written.map_err(|e| write_conflict::<A>(&id, e))?);

        let envelopes =
            build_envelopes::<A>(&id, version, aggregate.root().pending(), self.clock.now())?;
        tx.append_events(&envelopes).await?;
        aggregate.mark_saved(version);

        tracing::debug!(%version, events = envelopes.len(), "aggregate saved");
        Ok(envelopes)
    }
}

/// Persists only events; state is rebuilt by replaying them.
///
/// A per-aggregate stream head row carries the version and guards
/// concurrent appends the same way [`StateRepository`] guards documents.
pub struct EventSourcedRepository<A> {
    clock: Arc<dyn Clock>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> EventSourcedRepository<A> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            _aggregate: PhantomData,
        }
    }
}

impl<A> Default for EventSourcedRepository<A> {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn stream_table<A: Aggregate>() -> String {
    format!("{}:streams", A::aggregate_type())
}

#[async_trait]
impl<A> AggregateRepository<A, MemoryTx> for EventSourcedRepository<A>
where
    A: EventSourced,
{
    async fn find_by_id(
        &self,
        tx: &MemoryTx,
        id: &AggregateId,
    ) -> Result<Option<A>, RepositoryError> {
        let Some(head) = tx.get(&stream_table::<A>(), id.as_str()).await? else {
            return Ok(None);
        };
        let envelopes = tx.events_for(A::aggregate_type(), id.as_str()).await?;
        let history = decode_events::<A>(envelopes)?;
        Ok(Some(A::replay(
            id.clone(),
            Version::new(head.version),
            history,
        )))
    }

    async fn save(
        &self,
        tx: &MemoryTx,
        aggregate: &mut A,
    ) -> Result<Vec<EventEnvelope>, RepositoryError> {
        let id = aggregate.id().clone();
        let expected = aggregate.version();

        let table = stream_table::<A>();
        let written = if expected.is_initial() {
            tx.insert(&table, id.as_str(), Value::Null).await
        } else {
            tx.update(&table, id.as_str(), Value::Null, expected.as_i64())
                .await
        };
        let version = Version::new(written.map_err(|e| write_conflict::<A>(&id, e))?);

        let envelopes =
            build_envelopes::<A>(&id, version, aggregate.root().pending(), self.clock.now())?;
        tx.append_events(&envelopes).await?;
        aggregate.mark_saved(version);
        Ok(envelopes)
    }
}

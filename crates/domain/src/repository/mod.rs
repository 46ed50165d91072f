//! Aggregate persistence port and its adapters.

mod memory;
mod postgres;

pub use memory::{EventSourcedRepository, StateRepository};
pub use postgres::PostgresStateRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::AggregateId;
use store::{EventEnvelope, StoreError, Version};

use crate::aggregate::{Aggregate, DomainEvent};
use crate::error::RepositoryError;

/// Loads and saves one aggregate type inside a caller-owned transaction.
///
/// `save` inserts when the aggregate is at version 0 and otherwise updates
/// only if the stored version still equals the in-memory one. Either way the
/// version moves up by exactly one, and the returned envelopes are exactly
/// the events drained from the aggregate by this call.
#[async_trait]
pub trait AggregateRepository<A: Aggregate, Tx: Send + Sync>: Send + Sync {
    async fn find_by_id(&self, tx: &Tx, id: &AggregateId) -> Result<Option<A>, RepositoryError>;

    async fn save(&self, tx: &Tx, aggregate: &mut A) -> Result<Vec<EventEnvelope>, RepositoryError>;
}

pub(crate) fn build_envelopes<A: Aggregate>(
    aggregate_id: &AggregateId,
    version: Version,
    events: &[A::Event],
    recorded_at: DateTime<Utc>,
) -> Result<Vec<EventEnvelope>, RepositoryError> {
    events
        .iter()
        .zip(0u32..)
        .map(|(event, sequence)| -> Result<EventEnvelope, RepositoryError> {
            Ok(EventEnvelope::builder()
                .aggregate_id(aggregate_id.clone())
                .aggregate_type(A::aggregate_type())
                .event_type(event.event_type())
                .schema_version(event.schema_version())
                .version(version)
                .sequence(sequence)
                .timestamp(recorded_at)
                .data_raw(event.to_data()?)
                .build()?)
        })
        .collect()
}

pub(crate) fn decode_events<A: Aggregate>(
    envelopes: Vec<EventEnvelope>,
) -> Result<Vec<A::Event>, RepositoryError> {
    envelopes
        .into_iter()
        .map(|envelope| {
            A::Event::from_data(&envelope.event_type, envelope.data).map_err(|e| {
                RepositoryError::UnknownEvent {
                    aggregate_type: A::aggregate_type(),
                    event_type: envelope.event_type.clone(),
                    reason: e.to_string(),
                }
            })
        })
        .collect()
}

/// Turns a guarded-write failure into a repository conflict for this aggregate.
pub(crate) fn write_conflict<A: Aggregate>(
    aggregate_id: &AggregateId,
    err: StoreError,
) -> RepositoryError {
    match err {
        StoreError::VersionConflict {
            expected, actual, ..
        } => RepositoryError::Conflict {
            aggregate_type: A::aggregate_type(),
            aggregate_id: aggregate_id.clone(),
            expected: Version::new(expected),
            actual: Version::new(actual),
        },
        other => other.into(),
    }
}

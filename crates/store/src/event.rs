use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AggregateId, StoreError};

/// Identity of a single persisted event, independent of its aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an id read back from storage.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Persisted revision of an aggregate, compared on save to detect
/// concurrent writers.
///
/// A never-persisted aggregate sits at 0. Every successful save moves it up
/// by exactly one, however many events that save carried.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn initial() -> Self {
        Self(0)
    }

    /// The revision written by an aggregate's creating save.
    pub fn first() -> Self {
        Self::initial().next()
    }

    /// The revision a successful save produces from this one.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::initial()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Metadata carried next to every event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    /// Version of the payload shape, bumped when `data` changes incompatibly.
    pub schema_version: u32,

    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,

    /// Free-form context such as correlation ids or the acting user.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
}

impl EventMeta {
    pub fn new(schema_version: u32, timestamp: DateTime<Utc>) -> Self {
        Self {
            schema_version,
            timestamp,
            context: HashMap::new(),
        }
    }
}

/// A persisted domain event.
///
/// Envelopes are append-only: once a save has produced them they are never
/// mutated, only read back for replay or handed to projectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// Stable, versioned type name (e.g. `AssetCreated_V1`).
    pub event_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: AggregateId,

    /// The type of aggregate (e.g. `Asset`).
    pub aggregate_type: String,

    /// The aggregate version produced by the save that persisted this event.
    pub version: Version,

    /// Position of this event within that save, starting at 0.
    pub sequence: u32,

    /// The event payload as JSON.
    pub data: serde_json::Value,

    pub meta: EventMeta,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Ordering key within one aggregate's history.
    pub fn position(&self) -> (Version, u32) {
        (self.version, self.sequence)
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_id: Option<AggregateId>,
    aggregate_type: Option<String>,
    version: Option<Version>,
    sequence: u32,
    schema_version: Option<u32>,
    timestamp: Option<DateTime<Utc>>,
    data: Option<serde_json::Value>,
    context: HashMap<String, serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn aggregate_id(mut self, id: AggregateId) -> Self {
        self.aggregate_id = Some(id);
        self
    }

    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Defaults to 1.
    pub fn schema_version(mut self, schema_version: u32) -> Self {
        self.schema_version = Some(schema_version);
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn data<T: Serialize>(mut self, data: &T) -> Result<Self, serde_json::Error> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn data_raw(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Adds a context entry.
    pub fn context(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Builds the envelope, failing if a required field was never set.
    pub fn build(self) -> Result<EventEnvelope, StoreError> {
        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type: self
                .event_type
                .ok_or(StoreError::InvalidEnvelope("event_type is required"))?,
            aggregate_id: self
                .aggregate_id
                .ok_or(StoreError::InvalidEnvelope("aggregate_id is required"))?,
            aggregate_type: self
                .aggregate_type
                .ok_or(StoreError::InvalidEnvelope("aggregate_type is required"))?,
            version: self
                .version
                .ok_or(StoreError::InvalidEnvelope("version is required"))?,
            sequence: self.sequence,
            data: self
                .data
                .ok_or(StoreError::InvalidEnvelope("data is required"))?,
            meta: EventMeta {
                schema_version: self.schema_version.unwrap_or(1),
                timestamp: self.timestamp.unwrap_or_else(Utc::now),
                context: self.context,
            },
        })
    }
}

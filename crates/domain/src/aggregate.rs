//! Core aggregate and domain event traits.

use std::fmt::Debug;

use common::AggregateId;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use store::Version;

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
///
/// Implementors are enums serialized with `#[serde(tag = "type", content =
/// "data")]` whose variant names match [`DomainEvent::event_type`], which is
/// what lets the default `to_data`/`from_data` split and rejoin the stored
/// type and payload.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static {
    /// Returns the stable, versioned event type name (e.g. `AssetCreated_V1`).
    fn event_type(&self) -> &'static str;

    fn schema_version(&self) -> u32 {
        1
    }

    /// The payload without its type tag.
    fn to_data(&self) -> Result<Value, serde_json::Error> {
        let mut tagged = serde_json::to_value(self)?;
        Ok(tagged
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null))
    }

    /// Rebuilds an event from its stored type name and payload. Unknown type
    /// names are an error, never skipped.
    fn from_data(event_type: &str, data: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "type": event_type, "data": data }))
    }
}

/// Identity, version and pending events shared by every aggregate.
///
/// Only the id is part of the serialized document: the version is owned by
/// the repository and pending events never outlive one command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(serialize = "", deserialize = ""))]
pub struct AggregateRoot<E> {
    id: AggregateId,
    #[serde(skip)]
    version: Version,
    #[serde(skip)]
    pending: Vec<E>,
}

impl<E> AggregateRoot<E> {
    /// A root that has never been persisted.
    pub fn new(id: AggregateId) -> Self {
        Self::restore(id, Version::initial())
    }

    /// A root rehydrated at a persisted version, with nothing pending.
    pub fn restore(id: AggregateId, version: Version) -> Self {
        Self {
            id,
            version,
            pending: Vec::new(),
        }
    }

    pub fn id(&self) -> &AggregateId {
        &self.id
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Called by repositories after a load or a successful save.
    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    pub fn pending(&self) -> &[E] {
        &self.pending
    }

    fn record(&mut self, event: E) {
        self.pending.push(event);
    }

    fn drain(&mut self) -> Vec<E> {
        std::mem::take(&mut self.pending)
    }
}

/// An aggregate whose state changes only by applying its own events.
///
/// Command methods validate invariants, then call [`Aggregate::raise`]. The
/// repository drains raised events exactly once per save.
pub trait Aggregate: Send + Sync + Sized + 'static {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Returns the aggregate type name.
    fn aggregate_type() -> &'static str;

    fn root(&self) -> &AggregateRoot<Self::Event>;

    fn root_mut(&mut self) -> &mut AggregateRoot<Self::Event>;

    /// Applies an event to the aggregate, updating its state.
    ///
    /// Must be deterministic and infallible: events are facts.
    fn apply(&mut self, event: &Self::Event);

    fn id(&self) -> &AggregateId {
        self.root().id()
    }

    fn version(&self) -> Version {
        self.root().version()
    }

    /// True until the first successful save.
    fn is_new(&self) -> bool {
        self.version().is_initial()
    }

    /// Applies the event and buffers it for the next save.
    fn raise(&mut self, event: Self::Event) {
        self.apply(&event);
        self.root_mut().record(event);
    }

    /// Returns and clears the buffered events.
    fn pull_events(&mut self) -> Vec<Self::Event> {
        self.root_mut().drain()
    }

    /// Drains the buffer once a save has persisted it at `version`. A save
    /// that fails leaves the pending events in place.
    fn mark_saved(&mut self, version: Version) {
        self.pull_events();
        self.root_mut().set_version(version);
    }
}

/// Aggregates that can be rebuilt purely from their event history.
pub trait EventSourced: Aggregate {
    /// Empty state around a root, before any event is applied.
    fn blank(root: AggregateRoot<Self::Event>) -> Self;

    /// Rebuilds the aggregate at `version` by applying `history` in order.
    /// Nothing is buffered: replayed events are already persisted.
    fn replay(
        id: AggregateId,
        version: Version,
        history: impl IntoIterator<Item = Self::Event>,
    ) -> Self {
        let mut aggregate = Self::blank(AggregateRoot::restore(id, version));
        for event in history {
            aggregate.apply(&event);
        }
        aggregate
    }
}

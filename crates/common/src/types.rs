use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for an aggregate instance.
///
/// Identifiers are opaque strings: generated ones are UUIDs, but adapters may
/// hand in any non-empty value they already use as a primary key.
///
/// Deserializing goes through [`AggregateId::parse`], so blank ids are
/// rejected at the edge as well.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AggregateId(String);

/// Returned when parsing an empty identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("aggregate id must not be empty")]
pub struct InvalidId;

impl AggregateId {
    /// Creates a new random aggregate ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parses an identifier, rejecting empty or whitespace-only values.
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidId> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(InvalidId);
        }
        Ok(Self(value))
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AggregateId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for AggregateId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl TryFrom<String> for AggregateId {
    type Error = InvalidId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<AggregateId> for String {
    fn from(id: AggregateId) -> Self {
        id.0
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An [`AggregateId`] tagged with the aggregate kind it belongs to.
///
/// `TypedId<Asset>` and `TypedId<Portfolio>` share a representation but do not
/// unify, so an identifier of one kind cannot be passed where another is
/// expected. Serializes exactly like the wrapped id.
pub struct TypedId<T> {
    id: AggregateId,
    _kind: PhantomData<fn() -> T>,
}

impl<T> TypedId<T> {
    pub fn new() -> Self {
        Self::from(AggregateId::new())
    }

    pub fn as_aggregate_id(&self) -> &AggregateId {
        &self.id
    }

    pub fn into_inner(self) -> AggregateId {
        self.id
    }
}

impl<T> From<AggregateId> for TypedId<T> {
    fn from(id: AggregateId) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }
}

impl<T> Default for TypedId<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TypedId<T> {
    fn clone(&self) -> Self {
        Self::from(self.id.clone())
    }
}

impl<T> PartialEq for TypedId<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for TypedId<T> {}

impl<T> Hash for TypedId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> fmt::Debug for TypedId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedId").field(&self.id.as_str()).finish()
    }
}

impl<T> fmt::Display for TypedId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.id, f)
    }
}

impl<T> Serialize for TypedId<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for TypedId<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        AggregateId::deserialize(deserializer).map(Self::from)
    }
}

/// Source of fresh aggregate identifiers for creation commands.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> AggregateId;
}

/// Generates random UUID v4 identifiers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> AggregateId {
        AggregateId::new()
    }
}

/// Generates `prefix-1`, `prefix-2`, ... for reproducible tests and demos.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> AggregateId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        AggregateId(format!("{}-{n}", self.prefix))
    }
}

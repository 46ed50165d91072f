//! Idempotent command execution.
//!
//! A client may attach a key to a request. The first request under a given
//! `(key, command, scope)` claims a record inside its own transaction, runs,
//! and stores its response in that same transaction. Later requests with the
//! same key and payload get the stored response back without running again;
//! the same key with a different payload is rejected.

pub mod claim;
pub mod error;
pub mod executor;
pub mod hash;
pub mod memory;
pub mod postgres;

pub use claim::{
    ClaimOutcome, ClaimRequest, DEFAULT_LEASE_SECS, IdempotencyRecord, IdempotencyStore,
    RecordKey,
};
pub use error::IdempotencyError;
pub use executor::{IdempotencyRequest, IdempotentExecutor};
pub use hash::{canonical_json, stable_hash};
pub use memory::InMemoryIdempotencyStore;
pub use postgres::PostgresIdempotencyStore;

//! Transactions and persistence primitives for the command kernel.
//!
//! - [`UnitOfWork`] opens, commits and rolls back transactions; work runs
//!   through [`with_transaction`]
//! - [`EventEnvelope`] is the persisted form of a domain event
//! - [`InMemoryUnitOfWork`] is a fully transactional in-process store used by
//!   tests and the demo; [`PostgresUnitOfWork`] is the production adapter

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod uow;

pub use common::AggregateId;
pub use error::{Result, StoreError};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, EventMeta, Version};
pub use memory::{InMemoryUnitOfWork, MemoryTx, Row};
pub use postgres::{PgTx, PostgresUnitOfWork};
pub use uow::{UnitOfWork, with_transaction};

//! Domain layer of the command kernel.
//!
//! - [`Aggregate`] and [`AggregateRoot`] hold state, versions and pending events
//! - [`Command`] and [`CommandRegistry`] define what can be done to an aggregate
//! - [`CommandHandler`] runs a command as one all-or-nothing transaction
//! - [`AggregateRepository`] loads and saves aggregates with optimistic concurrency
//! - [`asset`] is a complete sample aggregate wired through all of the above

pub mod aggregate;
pub mod asset;
pub mod command;
pub mod error;
pub mod handler;
pub mod repository;

pub use aggregate::{Aggregate, AggregateRoot, DomainEvent, EventSourced};
pub use asset::{Asset, AssetCommand, AssetEvent, AssetService, AssetView, asset_commands};
pub use command::{
    Command, CommandName, CommandOutput, CommandRegistry, require_existing, require_new,
};
pub use error::{CommandError, InvariantCheck, InvariantViolation, RepositoryError};
pub use handler::{CommandHandler, CommandRequest, EventPublisher, PublishError};
pub use repository::{
    AggregateRepository, EventSourcedRepository, PostgresStateRepository, StateRepository,
};

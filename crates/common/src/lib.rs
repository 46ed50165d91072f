//! Shared types for the command kernel.
//!
//! - [`AggregateId`] and [`TypedId`] identify aggregate instances
//! - [`EdgeError`] is the closed error taxonomy every command outcome maps to
//! - [`Clock`] and [`IdGenerator`] are the deterministic dependencies commands
//!   are allowed to use

pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, FixedClock, ManualClock, SystemClock};
pub use error::{EdgeError, EdgeErrorKind, Violation};
pub use types::{AggregateId, IdGenerator, InvalidId, SequentialIdGenerator, TypedId, UuidIdGenerator};

//! Synchronous read-model projections.
//!
//! - [`Projector`] turns a batch of events into read-model writes through the
//!   caller's transaction
//! - [`ProjectionManager`] routes saved events to subscribed projectors and
//!   plugs into the command handler as its event publisher
//! - [`views`] holds the asset summary read model for both stores

pub mod error;
pub mod manager;
pub mod projection;
pub mod views;

pub use error::{ProjectionError, Result};
pub use manager::ProjectionManager;
pub use projection::Projector;
pub use views::{AssetSummary, AssetSummaryProjector, PgAssetSummaryProjector};

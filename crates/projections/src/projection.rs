//! Core projector trait.

use async_trait::async_trait;
use store::EventEnvelope;

use crate::Result;

/// Turns events into read-model writes within the caller's transaction.
///
/// Projectors are the mechanism by which events are transformed into
/// denormalized read models optimized for queries. Because they write through
/// the same transaction as the command that raised the events, a projector
/// failure undoes the command.
#[async_trait]
pub trait Projector<Tx>: Send + Sync {
    /// Unique name, used for registration, logs and metrics.
    fn name(&self) -> &'static str;

    /// Event types this projector wants to receive.
    fn event_types(&self) -> &'static [&'static str];

    /// Handles a batch of subscribed events, in the order they were raised.
    async fn project(&self, events: &[EventEnvelope], tx: &Tx) -> Result<()>;

    /// Clears the read model before a rebuild.
    async fn reset(&self, _tx: &Tx) -> Result<()> {
        Ok(())
    }
}

//! Fan-out of persisted events to registered projectors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{EventPublisher, PublishError};
use futures_util::future::try_join_all;
use store::EventEnvelope;

use crate::Result;
use crate::error::ProjectionError;
use crate::projection::Projector;

/// Routes each saved batch of events to the projectors subscribed to them.
///
/// Every projector sees only its own event types, in the order they were
/// raised. Distinct projectors run concurrently on the same transaction
/// handle, and the first failure fails the whole publish. Events nobody
/// subscribed to are dropped.
pub struct ProjectionManager<Tx> {
    projectors: Vec<Arc<dyn Projector<Tx>>>,
    subscriptions: HashMap<&'static str, Vec<usize>>,
}

impl<Tx: Send + Sync> ProjectionManager<Tx> {
    pub fn new() -> Self {
        Self {
            projectors: Vec::new(),
            subscriptions: HashMap::new(),
        }
    }

    /// Subscribes `projector` to every event type it declares.
    pub fn register(&mut self, projector: Arc<dyn Projector<Tx>>) -> Result<()> {
        let name = projector.name();
        if self.projectors.iter().any(|p| p.name() == name) {
            return Err(ProjectionError::DuplicateProjector(name));
        }

        let index = self.projectors.len();
        for &event_type in projector.event_types() {
            let subscribers = self.subscriptions.entry(event_type).or_default();
            if !subscribers.contains(&index) {
                subscribers.push(index);
            }
        }
        tracing::debug!(projector = name, event_types = ?projector.event_types(), "projector registered");
        self.projectors.push(projector);
        Ok(())
    }

    pub fn projector_count(&self) -> usize {
        self.projectors.len()
    }

    /// Names of the projectors subscribed to `event_type`.
    pub fn subscribers(&self, event_type: &str) -> Vec<&'static str> {
        self.subscriptions
            .get(event_type)
            .map(|indexes| indexes.iter().map(|&i| self.projectors[i].name()).collect())
            .unwrap_or_default()
    }

    /// Splits `events` into one ordered batch per subscribed projector.
    fn batches(&self, events: &[EventEnvelope]) -> Vec<(usize, Vec<EventEnvelope>)> {
        let mut batches: Vec<Vec<EventEnvelope>> = vec![Vec::new(); self.projectors.len()];
        for event in events {
            match self.subscriptions.get(event.event_type.as_str()) {
                Some(indexes) => {
                    for &i in indexes {
                        batches[i].push(event.clone());
                    }
                }
                None => tracing::trace!(event_type = %event.event_type, "no projector subscribed"),
            }
        }
        batches
            .into_iter()
            .enumerate()
            .filter(|(_, batch)| !batch.is_empty())
            .collect()
    }

    /// Delivers `events` to their projectors inside `tx`.
    #[tracing::instrument(skip_all, fields(events = events.len()))]
    pub async fn dispatch(&self, events: &[EventEnvelope], tx: &Tx) -> std::result::Result<(), PublishError> {
        let work = self.batches(events).into_iter().map(|(i, batch)| {
            let projector = &self.projectors[i];
            async move {
                projector.project(&batch, tx).await.map_err(|e| {
                    tracing::error!(projector = projector.name(), error = %e, "projection failed");
                    PublishError {
                        target: projector.name().to_string(),
                        reason: e.to_string(),
                    }
                })?;
                metrics::counter!("kernel_projection_events_total", "projector" => projector.name())
                    .increment(batch.len() as u64);
                Ok::<(), PublishError>(())
            }
        });

        try_join_all(work).await?;
        Ok(())
    }

    /// Resets every projector and feeds it `history` from scratch.
    #[tracing::instrument(skip_all, fields(events = history.len()))]
    pub async fn rebuild(&self, history: &[EventEnvelope], tx: &Tx) -> std::result::Result<(), PublishError> {
        for projector in &self.projectors {
            projector.reset(tx).await.map_err(|e| PublishError {
                target: projector.name().to_string(),
                reason: e.to_string(),
            })?;
        }
        self.dispatch(history, tx).await?;
        tracing::info!("projections rebuilt");
        Ok(())
    }
}

impl<Tx: Send + Sync> Default for ProjectionManager<Tx> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<Tx: Send + Sync> EventPublisher<Tx> for ProjectionManager<Tx> {
    async fn publish(&self, events: &[EventEnvelope], tx: &Tx) -> std::result::Result<(), PublishError> {
        self.dispatch(events, tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use store::Version;
    use tokio::sync::Mutex;

    /// Stands in for a transaction: a log every projector writes to.
    type LogTx = Mutex<Vec<String>>;

    struct Recorder {
        name: &'static str,
        types: &'static [&'static str],
        fail: bool,
    }

    #[async_trait]
    impl Projector<LogTx> for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn event_types(&self) -> &'static [&'static str] {
            self.types
        }

        async fn project(&self, events: &[EventEnvelope], tx: &LogTx) -> Result<()> {
            if self.fail {
                return Err(ProjectionError::Projection("boom".into()));
            }
            let mut log = tx.lock().await;
            for event in events {
                log.push(format!("{}:{}", self.name, event.event_type));
            }
            Ok(())
        }

        async fn reset(&self, tx: &LogTx) -> Result<()> {
            tx.lock().await.push(format!("{}:reset", self.name));
            Ok(())
        }
    }

    fn recorder(name: &'static str, types: &'static [&'static str]) -> Arc<dyn Projector<LogTx>> {
        Arc::new(Recorder {
            name,
            types,
            fail: false,
        })
    }

    fn event(event_type: &str, sequence: u32) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(AggregateId::parse("a-1").unwrap())
            .aggregate_type("Asset")
            .event_type(event_type)
            .version(Version::new(1))
            .sequence(sequence)
            .data_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn each_projector_gets_its_types_in_order() {
        let mut manager = ProjectionManager::new();
        manager.register(recorder("summary", &["A", "B"])).unwrap();
        manager.register(recorder("audit", &["B"])).unwrap();

        let tx = LogTx::default();
        manager
            .dispatch(&[event("B", 0), event("C", 1), event("A", 2)], &tx)
            .await
            .unwrap();

        let mut log = tx.into_inner();
        let summary: Vec<_> = log.iter().filter(|l| l.starts_with("summary")).cloned().collect();
        assert_eq!(summary, vec!["summary:B", "summary:A"]);
        log.sort();
        assert_eq!(log, vec!["audit:B", "summary:A", "summary:B"]);
    }

    #[tokio::test]
    async fn repeated_event_types_subscribe_once() {
        let mut manager = ProjectionManager::new();
        manager.register(recorder("summary", &["A", "A"])).unwrap();
        assert_eq!(manager.subscribers("A"), vec!["summary"]);

        let tx = LogTx::default();
        manager.dispatch(&[event("A", 0)], &tx).await.unwrap();
        assert_eq!(tx.into_inner(), vec!["summary:A"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut manager = ProjectionManager::<LogTx>::new();
        manager.register(recorder("summary", &["A"])).unwrap();
        let err = manager.register(recorder("summary", &["B"])).unwrap_err();
        assert!(matches!(err, ProjectionError::DuplicateProjector("summary")));
        assert_eq!(manager.projector_count(), 1);
    }

    #[tokio::test]
    async fn failure_names_the_projector() {
        let mut manager = ProjectionManager::new();
        manager.register(recorder("summary", &["A"])).unwrap();
        manager
            .register(Arc::new(Recorder {
                name: "broken",
                types: &["A"],
                fail: true,
            }))
            .unwrap();

        let err = manager
            .publish(&[event("A", 0)], &LogTx::default())
            .await
            .unwrap_err();
        assert_eq!(err.target, "broken");
    }

    #[tokio::test]
    async fn rebuild_resets_then_replays() {
        let mut manager = ProjectionManager::new();
        manager.register(recorder("summary", &["A"])).unwrap();

        let tx = LogTx::default();
        manager.rebuild(&[event("A", 0)], &tx).await.unwrap();
        assert_eq!(tx.into_inner(), vec!["summary:reset", "summary:A"]);
    }
}

//! In-process transactional store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

use crate::{EventEnvelope, Result, StoreError, uow::UnitOfWork};

/// A stored document and the version guarding it.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub version: i64,
    pub value: Value,
}

#[derive(Debug, Default)]
struct MemoryState {
    tables: HashMap<String, HashMap<String, Row>>,
    events: Vec<EventEnvelope>,
}

impl MemoryState {
    fn row(&self, table: &str, key: &str) -> Option<&Row> {
        self.tables.get(table).and_then(|rows| rows.get(key))
    }
}

/// What the committed row must look like for a staged write to apply.
#[derive(Debug, Clone, Copy)]
enum Expect {
    Absent,
    Version(i64),
    Anything,
}

#[derive(Debug)]
struct StagedWrite {
    expect: Expect,
    /// `None` stages a delete.
    row: Option<Row>,
}

#[derive(Debug)]
struct TxState {
    open: bool,
    writes: HashMap<(String, String), StagedWrite>,
    events: Vec<EventEnvelope>,
}

/// In-memory unit of work.
///
/// Transactions stage their writes privately and read their own writes.
/// Commit validates every staged precondition against the committed state
/// under one write lock and applies all or nothing, so two transactions that
/// raced on the same row cannot both commit.
#[derive(Clone, Default)]
pub struct InMemoryUnitOfWork {
    state: Arc<RwLock<MemoryState>>,
    fail_next_commit: Arc<AtomicBool>,
    next_tx: Arc<AtomicU64>,
}

/// Handle to an open in-memory transaction.
#[derive(Clone)]
pub struct MemoryTx {
    id: u64,
    shared: Arc<RwLock<MemoryState>>,
    inner: Arc<Mutex<TxState>>,
}

impl InMemoryUnitOfWork {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail with [`StoreError::Unavailable`], discarding
    /// the transaction's writes.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Returns the total number of committed events.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.events.len()
    }

    /// Returns every committed event in append order.
    pub async fn events(&self) -> Vec<EventEnvelope> {
        self.state.read().await.events.clone()
    }

    /// Reads a committed row.
    pub async fn row(&self, table: &str, key: &str) -> Option<Row> {
        self.state.read().await.row(table, key).cloned()
    }

    /// Reads every committed row of a table, ordered by key.
    pub async fn rows(&self, table: &str) -> Vec<(String, Row)> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, r)| (k.clone(), r.clone())).collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx> {
        Ok(MemoryTx {
            id: self.next_tx.fetch_add(1, Ordering::Relaxed) + 1,
            shared: Arc::clone(&self.state),
            inner: Arc::new(Mutex::new(TxState {
                open: true,
                writes: HashMap::new(),
                events: Vec::new(),
            })),
        })
    }

    #[tracing::instrument(skip(self, tx), fields(tx = tx.id))]
    async fn commit(&self, tx: MemoryTx) -> Result<()> {
        let mut inner = tx.inner.lock().await;
        if !inner.open {
            return Err(StoreError::TransactionClosed);
        }
        inner.open = false;
        let writes = std::mem::take(&mut inner.writes);
        let events = std::mem::take(&mut inner.events);

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        let mut state = self.state.write().await;

        for ((table, key), write) in &writes {
            let actual = state.row(table, key).map(|r| r.version);
            let ok = match write.expect {
                Expect::Absent => actual.is_none(),
                Expect::Version(v) => actual == Some(v),
                Expect::Anything => true,
            };
            if !ok {
                metrics::counter!("store_commit_conflicts").increment(1);
                return Err(StoreError::VersionConflict {
                    table: table.clone(),
                    key: key.clone(),
                    expected: match write.expect {
                        Expect::Version(v) => v,
                        _ => 0,
                    },
                    actual: actual.unwrap_or(0),
                });
            }
        }

        let event_count = events.len();
        for ((table, key), write) in writes {
            let rows = state.tables.entry(table).or_default();
            match write.row {
                Some(row) => {
                    rows.insert(key, row);
                }
                None => {
                    rows.remove(&key);
                }
            }
        }
        state.events.extend(events);

        tracing::debug!(events = event_count, "transaction committed");
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> Result<()> {
        let mut inner = tx.inner.lock().await;
        if !inner.open {
            return Err(StoreError::TransactionClosed);
        }
        inner.open = false;
        inner.writes.clear();
        inner.events.clear();
        Ok(())
    }
}

impl MemoryTx {
    async fn open(&self) -> Result<tokio::sync::MutexGuard<'_, TxState>> {
        let inner = self.inner.lock().await;
        if inner.open {
            Ok(inner)
        } else {
            Err(StoreError::TransactionClosed)
        }
    }

    fn stage(inner: &mut TxState, table: &str, key: &str, expect: Expect, row: Option<Row>) {
        inner
            .writes
            .entry((table.to_string(), key.to_string()))
            .and_modify(|w| w.row = row.clone())
            .or_insert(StagedWrite { expect, row });
    }

    async fn current(&self, inner: &TxState, table: &str, key: &str) -> Option<Row> {
        if let Some(write) = inner.writes.get(&(table.to_string(), key.to_string())) {
            return write.row.clone();
        }
        self.shared.read().await.row(table, key).cloned()
    }

    /// Reads a row, seeing this transaction's own staged writes.
    pub async fn get(&self, table: &str, key: &str) -> Result<Option<Row>> {
        let inner = self.open().await?;
        Ok(self.current(&inner, table, key).await)
    }

    /// Inserts a new row at version 1. Fails if the row exists.
    pub async fn insert(&self, table: &str, key: &str, value: Value) -> Result<i64> {
        let mut inner = self.open().await?;
        if let Some(existing) = self.current(&inner, table, key).await {
            return Err(StoreError::VersionConflict {
                table: table.to_string(),
                key: key.to_string(),
                expected: 0,
                actual: existing.version,
            });
        }
        Self::stage(
            &mut inner,
            table,
            key,
            Expect::Absent,
            Some(Row { version: 1, value }),
        );
        Ok(1)
    }

    /// Replaces a row if it is still at `expected`, returning the new version.
    pub async fn update(&self, table: &str, key: &str, value: Value, expected: i64) -> Result<i64> {
        let mut inner = self.open().await?;
        let actual = self
            .current(&inner, table, key)
            .await
            .map(|r| r.version)
            .unwrap_or(0);
        if actual != expected {
            return Err(StoreError::VersionConflict {
                table: table.to_string(),
                key: key.to_string(),
                expected,
                actual,
            });
        }
        let version = expected + 1;
        Self::stage(
            &mut inner,
            table,
            key,
            Expect::Version(expected),
            Some(Row { version, value }),
        );
        Ok(version)
    }

    /// Unconditional upsert, for read models that have no concurrency guard.
    pub async fn put(&self, table: &str, key: &str, value: Value) -> Result<()> {
        let mut inner = self.open().await?;
        let version = self
            .current(&inner, table, key)
            .await
            .map(|r| r.version + 1)
            .unwrap_or(1);
        Self::stage(
            &mut inner,
            table,
            key,
            Expect::Anything,
            Some(Row { version, value }),
        );
        Ok(())
    }

    pub async fn delete(&self, table: &str, key: &str) -> Result<()> {
        let mut inner = self.open().await?;
        Self::stage(&mut inner, table, key, Expect::Anything, None);
        Ok(())
    }

    /// Lists a table's rows as this transaction sees them, ordered by key.
    pub async fn scan(&self, table: &str) -> Result<Vec<(String, Row)>> {
        let inner = self.open().await?;
        let mut rows: HashMap<String, Row> = self
            .shared
            .read()
            .await
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default();

        for ((t, key), write) in &inner.writes {
            if t != table {
                continue;
            }
            match &write.row {
                Some(row) => {
                    rows.insert(key.clone(), row.clone());
                }
                None => {
                    rows.remove(key);
                }
            }
        }

        let mut rows: Vec<_> = rows.into_iter().collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(rows)
    }

    /// Stages events for append on commit.
    pub async fn append_events(&self, events: &[EventEnvelope]) -> Result<()> {
        let mut inner = self.open().await?;
        inner.events.extend_from_slice(events);
        Ok(())
    }

    /// Returns one aggregate's events, committed then staged, in order.
    pub async fn events_for(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Vec<EventEnvelope>> {
        let inner = self.open().await?;
        let belongs = |e: &&EventEnvelope| {
            e.aggregate_type == aggregate_type && e.aggregate_id.as_str() == aggregate_id
        };

        let mut events: Vec<_> = self
            .shared
            .read()
            .await
            .events
            .iter()
            .filter(belongs)
            .cloned()
            .collect();
        events.extend(inner.events.iter().filter(belongs).cloned());
        events.sort_by_key(EventEnvelope::position);
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AggregateId, Version};
    use serde_json::json;

    fn event(aggregate_id: &AggregateId, version: i64, sequence: u32) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(aggregate_id.clone())
            .aggregate_type("Asset")
            .event_type("AssetRenamed_V1")
            .version(Version::new(version))
            .sequence(sequence)
            .data_raw(json!({"name": "x"}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn reads_own_writes_before_commit() {
        let uow = InMemoryUnitOfWork::new();
        let tx = uow.begin().await.unwrap();

        tx.insert("assets", "a-1", json!({"n": 1})).await.unwrap();

        let row = tx.get("assets", "a-1").await.unwrap().unwrap();
        assert_eq!(row.version, 1);
        assert!(uow.row("assets", "a-1").await.is_none());

        uow.commit(tx).await.unwrap();
        assert_eq!(uow.row("assets", "a-1").await.unwrap().value, json!({"n": 1}));
    }

    #[tokio::test]
    async fn insert_existing_row_conflicts() {
        let uow = InMemoryUnitOfWork::new();
        let tx = uow.begin().await.unwrap();
        tx.insert("assets", "a-1", json!({})).await.unwrap();
        uow.commit(tx).await.unwrap();

        let tx = uow.begin().await.unwrap();
        let err = tx.insert("assets", "a-1", json!({})).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::VersionConflict {
                expected: 0,
                actual: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn update_checks_expected_version() {
        let uow = InMemoryUnitOfWork::new();
        let tx = uow.begin().await.unwrap();
        tx.insert("assets", "a-1", json!({"n": 1})).await.unwrap();
        assert_eq!(
            tx.update("assets", "a-1", json!({"n": 2}), 1).await.unwrap(),
            2
        );
        let err = tx
            .update("assets", "a-1", json!({"n": 3}), 1)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        uow.commit(tx).await.unwrap();

        let row = uow.row("assets", "a-1").await.unwrap();
        assert_eq!(row.version, 2);
        assert_eq!(row.value, json!({"n": 2}));
    }

    #[tokio::test]
    async fn racing_commits_have_one_winner() {
        let uow = InMemoryUnitOfWork::new();
        let seed = uow.begin().await.unwrap();
        seed.insert("assets", "a-1", json!({"n": 0})).await.unwrap();
        uow.commit(seed).await.unwrap();

        let first = uow.begin().await.unwrap();
        let second = uow.begin().await.unwrap();
        first
            .update("assets", "a-1", json!({"n": 1}), 1)
            .await
            .unwrap();
        second
            .update("assets", "a-1", json!({"n": 2}), 1)
            .await
            .unwrap();

        uow.commit(first).await.unwrap();
        let err = uow.commit(second).await.unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(uow.row("assets", "a-1").await.unwrap().value, json!({"n": 1}));
    }

    #[tokio::test]
    async fn racing_inserts_have_one_winner() {
        let uow = InMemoryUnitOfWork::new();
        let first = uow.begin().await.unwrap();
        let second = uow.begin().await.unwrap();
        first.insert("keys", "k", json!("a")).await.unwrap();
        second.insert("keys", "k", json!("b")).await.unwrap();

        uow.commit(first).await.unwrap();
        assert!(uow.commit(second).await.unwrap_err().is_conflict());
        assert_eq!(uow.row("keys", "k").await.unwrap().value, json!("a"));
    }

    #[tokio::test]
    async fn failed_commit_applies_nothing() {
        let uow = InMemoryUnitOfWork::new();
        let seed = uow.begin().await.unwrap();
        seed.insert("assets", "a-1", json!({})).await.unwrap();
        uow.commit(seed).await.unwrap();

        let id = AggregateId::new();
        let stale = uow.begin().await.unwrap();
        stale.insert("assets", "a-2", json!({})).await.unwrap();
        stale.update("assets", "a-1", json!({}), 1).await.unwrap();
        stale.append_events(&[event(&id, 1, 0)]).await.unwrap();

        let fresh = uow.begin().await.unwrap();
        fresh.update("assets", "a-1", json!({}), 1).await.unwrap();
        uow.commit(fresh).await.unwrap();

        assert!(uow.commit(stale).await.is_err());

        assert!(uow.row("assets", "a-2").await.is_none());
        assert_eq!(uow.event_count().await, 0);
    }

    #[tokio::test]
    async fn rollback_discards_everything() {
        let uow = InMemoryUnitOfWork::new();
        let id = AggregateId::new();
        let tx = uow.begin().await.unwrap();
        tx.insert("assets", "a-1", json!({})).await.unwrap();
        tx.append_events(&[event(&id, 1, 0)]).await.unwrap();

        uow.rollback(tx.clone()).await.unwrap();

        assert!(uow.row("assets", "a-1").await.is_none());
        assert_eq!(uow.event_count().await, 0);
        assert!(matches!(
            tx.get("assets", "a-1").await,
            Err(StoreError::TransactionClosed)
        ));
    }

    #[tokio::test]
    async fn events_for_merges_committed_and_staged() {
        let uow = InMemoryUnitOfWork::new();
        let id = AggregateId::new();
        let other = AggregateId::new();

        let tx = uow.begin().await.unwrap();
        tx.append_events(&[event(&id, 1, 0), event(&id, 1, 1), event(&other, 1, 0)])
            .await
            .unwrap();
        uow.commit(tx).await.unwrap();

        let tx = uow.begin().await.unwrap();
        tx.append_events(&[event(&id, 2, 0)]).await.unwrap();
        let events = tx.events_for("Asset", id.as_str()).await.unwrap();

        let positions: Vec<_> = events.iter().map(|e| e.position()).collect();
        assert_eq!(
            positions,
            vec![
                (Version::new(1), 0),
                (Version::new(1), 1),
                (Version::new(2), 0)
            ]
        );
    }

    #[tokio::test]
    async fn scan_and_delete() {
        let uow = InMemoryUnitOfWork::new();
        let tx = uow.begin().await.unwrap();
        tx.put("summaries", "b", json!(2)).await.unwrap();
        tx.put("summaries", "a", json!(1)).await.unwrap();
        uow.commit(tx).await.unwrap();

        let tx = uow.begin().await.unwrap();
        tx.delete("summaries", "a").await.unwrap();
        tx.put("summaries", "c", json!(3)).await.unwrap();
        let keys: Vec<_> = tx
            .scan("summaries")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["b", "c"]);
    }
}

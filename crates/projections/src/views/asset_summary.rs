//! Asset summary read model: one row per asset with its latest valuation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use domain::DomainEvent;
use domain::asset::AssetEvent;
use domain::asset::events::{ASSET_CREATED, ASSET_DELETED, ASSET_RENAMED, VALUATION_RECORDED};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::postgres::PgRow;
use store::{EventEnvelope, MemoryTx, PgTx};

use crate::Result;
use crate::error::ProjectionError;
use crate::projection::Projector;

pub const TABLE: &str = "asset_summaries";

const EVENT_TYPES: &[&str] = &[ASSET_CREATED, ASSET_RENAMED, VALUATION_RECORDED, ASSET_DELETED];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetSummary {
    pub asset_id: String,
    pub name: String,
    pub kind: String,
    pub currency: String,
    pub valuation_count: u32,
    /// Minor units of the valuation with the latest `as_of` date.
    pub latest_valuation: Option<i64>,
    pub latest_valued_on: Option<NaiveDate>,
    pub deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl AssetSummary {
    /// Folds one event into the summary. Only a creation may start a summary.
    pub fn apply(current: Option<Self>, event: &EventEnvelope) -> Result<Self> {
        let decoded = AssetEvent::from_data(&event.event_type, event.data.clone())?;
        let at = event.meta.timestamp;

        let mut summary = match (current, decoded) {
            (_, AssetEvent::AssetCreated(data)) => {
                return Ok(Self {
                    asset_id: event.aggregate_id.to_string(),
                    name: data.name,
                    kind: data.kind.to_string(),
                    currency: data.currency.to_string(),
                    valuation_count: 0,
                    latest_valuation: None,
                    latest_valued_on: None,
                    deleted: false,
                    updated_at: at,
                });
            }
            (None, _) => {
                return Err(ProjectionError::Projection(format!(
                    "{} for unknown asset {}",
                    event.event_type, event.aggregate_id
                )));
            }
            (Some(mut summary), AssetEvent::AssetRenamed(data)) => {
                summary.name = data.name;
                summary
            }
            (Some(mut summary), AssetEvent::ValuationRecorded(data)) => {
                summary.valuation_count += 1;
                // Backdated appraisals count but do not replace a newer one.
                if summary.latest_valued_on.is_none_or(|latest| data.as_of >= latest) {
                    summary.latest_valuation = Some(data.amount.amount_minor());
                    summary.latest_valued_on = Some(data.as_of);
                }
                summary
            }
            (Some(mut summary), AssetEvent::AssetDeleted(_)) => {
                summary.deleted = true;
                summary
            }
        };
        summary.updated_at = at;
        Ok(summary)
    }
}

/// Applies a batch, touching each summary once: load on first sight, fold
/// every event in order, then hand back the results keyed by asset.
async fn fold_batch<'a, L, Fut>(
    events: &'a [EventEnvelope],
    mut load: L,
) -> Result<BTreeMap<String, AssetSummary>>
where
    L: FnMut(&'a str) -> Fut,
    Fut: std::future::Future<Output = Result<Option<AssetSummary>>>,
{
    let mut touched: BTreeMap<String, AssetSummary> = BTreeMap::new();
    for event in events {
        let key = event.aggregate_id.as_str();
        let current = match touched.remove(key) {
            Some(summary) => Some(summary),
            None => load(key).await?,
        };
        touched.insert(key.to_string(), AssetSummary::apply(current, event)?);
    }
    Ok(touched)
}

/// Keeps asset summaries in the in-memory store.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssetSummaryProjector;

impl AssetSummaryProjector {
    pub async fn get(tx: &MemoryTx, asset_id: &str) -> Result<Option<AssetSummary>> {
        match tx.get(TABLE, asset_id).await? {
            Some(row) => Ok(Some(serde_json::from_value(row.value)?)),
            None => Ok(None),
        }
    }

    /// Every summary, ordered by asset id.
    pub async fn list(tx: &MemoryTx) -> Result<Vec<AssetSummary>> {
        let mut summaries = tx
            .scan(TABLE)
            .await?
            .into_iter()
            .map(|(_, row)| serde_json::from_value::<AssetSummary>(row.value))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        summaries.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));
        Ok(summaries)
    }
}

#[async_trait]
impl Projector<MemoryTx> for AssetSummaryProjector {
    fn name(&self) -> &'static str {
        "asset_summary"
    }

    fn event_types(&self) -> &'static [&'static str] {
        EVENT_TYPES
    }

    async fn project(&self, events: &[EventEnvelope], tx: &MemoryTx) -> Result<()> {
        let touched = fold_batch(events, |id| Self::get(tx, id)).await?;
        for (asset_id, summary) in touched {
            tx.put(TABLE, &asset_id, serde_json::to_value(&summary)?).await?;
        }
        Ok(())
    }

    async fn reset(&self, tx: &MemoryTx) -> Result<()> {
        for (key, _) in tx.scan(TABLE).await? {
            tx.delete(TABLE, &key).await?;
        }
        Ok(())
    }
}

/// Keeps asset summaries in the `asset_summaries` table.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgAssetSummaryProjector;

impl PgAssetSummaryProjector {
    /// Reads a summary, locking its row for the rest of the transaction.
    pub async fn get(tx: &PgTx, asset_id: &str) -> Result<Option<AssetSummary>> {
        let mut conn = tx.conn().await?;
        let row = sqlx::query(
            r#"
            SELECT asset_id, name, kind, currency, valuation_count, latest_valuation,
                   latest_valued_on, deleted, updated_at
            FROM asset_summaries
            WHERE asset_id = $1
            FOR UPDATE
            "#,
        )
        .bind(asset_id)
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| summary_from_row(&r)).transpose()
    }

    async fn upsert(tx: &PgTx, summary: &AssetSummary) -> Result<()> {
        let mut conn = tx.conn().await?;
        sqlx::query(
            r#"
            INSERT INTO asset_summaries (
                asset_id, name, kind, currency, valuation_count, latest_valuation,
                latest_valued_on, deleted, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (asset_id) DO UPDATE SET
                name = EXCLUDED.name,
                kind = EXCLUDED.kind,
                currency = EXCLUDED.currency,
                valuation_count = EXCLUDED.valuation_count,
                latest_valuation = EXCLUDED.latest_valuation,
                latest_valued_on = EXCLUDED.latest_valued_on,
                deleted = EXCLUDED.deleted,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&summary.asset_id)
        .bind(&summary.name)
        .bind(&summary.kind)
        .bind(&summary.currency)
        .bind(summary.valuation_count as i32)
        .bind(summary.latest_valuation)
        .bind(summary.latest_valued_on)
        .bind(summary.deleted)
        .bind(summary.updated_at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }
}

fn summary_from_row(row: &PgRow) -> Result<AssetSummary> {
    Ok(AssetSummary {
        asset_id: row.try_get("asset_id")?,
        name: row.try_get("name")?,
        kind: row.try_get("kind")?,
        currency: row.try_get("currency")?,
        valuation_count: row.try_get::<i32, _>("valuation_count")? as u32,
        latest_valuation: row.try_get("latest_valuation")?,
        latest_valued_on: row.try_get("latest_valued_on")?,
        deleted: row.try_get("deleted")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Projector<PgTx> for PgAssetSummaryProjector {
    fn name(&self) -> &'static str {
        "asset_summary"
    }

    fn event_types(&self) -> &'static [&'static str] {
        EVENT_TYPES
    }

    async fn project(&self, events: &[EventEnvelope], tx: &PgTx) -> Result<()> {
        let touched = fold_batch(events, |id| Self::get(tx, id)).await?;
        for summary in touched.values() {
            Self::upsert(tx, summary).await?;
        }
        Ok(())
    }

    async fn reset(&self, tx: &PgTx) -> Result<()> {
        let mut conn = tx.conn().await?;
        sqlx::query("DELETE FROM asset_summaries")
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateId;
    use domain::asset::events::{
        AssetCreatedData, AssetDeletedData, AssetRenamedData, ValuationRecordedData,
    };
    use domain::asset::{AssetKind, Currency, Money};
    use store::{InMemoryUnitOfWork, UnitOfWork, Version};

    fn at(day: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn envelope(id: &str, version: i64, event: AssetEvent) -> EventEnvelope {
        EventEnvelope::builder()
            .aggregate_id(AggregateId::parse(id).unwrap())
            .aggregate_type("Asset")
            .event_type(event.event_type())
            .version(Version::new(version))
            .timestamp(at(version as u32))
            .data_raw(event.to_data().unwrap())
            .build()
            .unwrap()
    }

    fn eur() -> Currency {
        Currency::parse("EUR").unwrap()
    }

    fn created(id: &str) -> EventEnvelope {
        envelope(
            id,
            1,
            AssetEvent::AssetCreated(AssetCreatedData {
                asset_id: AggregateId::parse(id).unwrap().into(),
                name: "Loft".into(),
                kind: AssetKind::RealEstate,
                currency: eur(),
            }),
        )
    }

    fn valued(id: &str, version: i64, amount: i64, day: u32) -> EventEnvelope {
        envelope(
            id,
            version,
            AssetEvent::ValuationRecorded(ValuationRecordedData {
                amount: Money::new(amount, eur()),
                as_of: NaiveDate::from_ymd_opt(2024, 2, day).unwrap(),
                recorded_at: at(version as u32),
            }),
        )
    }

    #[test]
    fn creation_starts_a_summary() {
        let summary = AssetSummary::apply(None, &created("asset-1")).unwrap();
        assert_eq!(summary.asset_id, "asset-1");
        assert_eq!(summary.kind, "real_estate");
        assert_eq!(summary.currency, "EUR");
        assert_eq!(summary.valuation_count, 0);
        assert_eq!(summary.updated_at, at(1));
    }

    #[test]
    fn update_without_summary_is_an_error() {
        let err = AssetSummary::apply(None, &valued("asset-1", 2, 100, 1)).unwrap_err();
        assert!(matches!(err, ProjectionError::Projection(_)));
    }

    #[test]
    fn backdated_valuation_does_not_replace_latest() {
        let summary = [valued("asset-1", 2, 500, 20), valued("asset-1", 3, 300, 10)]
            .iter()
            .try_fold(AssetSummary::apply(None, &created("asset-1")).unwrap(), |s, e| {
                AssetSummary::apply(Some(s), e)
            })
            .unwrap();

        assert_eq!(summary.valuation_count, 2);
        assert_eq!(summary.latest_valuation, Some(500));
        assert_eq!(summary.latest_valued_on, NaiveDate::from_ymd_opt(2024, 2, 20));
        assert_eq!(summary.updated_at, at(3));
    }

    #[tokio::test]
    async fn batch_writes_folded_summaries() {
        let uow = InMemoryUnitOfWork::new();
        let tx = uow.begin().await.unwrap();
        let batch = vec![
            created("asset-1"),
            envelope(
                "asset-1",
                2,
                AssetEvent::AssetRenamed(AssetRenamedData {
                    previous_name: "Loft".into(),
                    name: "Harbour loft".into(),
                }),
            ),
            created("asset-2"),
            envelope(
                "asset-2",
                3,
                AssetEvent::AssetDeleted(AssetDeletedData {
                    deleted_at: at(3),
                    reason: None,
                }),
            ),
        ];

        AssetSummaryProjector.project(&batch, &tx).await.unwrap();

        let all = AssetSummaryProjector::list(&tx).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "Harbour loft");
        assert!(all[1].deleted);

        AssetSummaryProjector.reset(&tx).await.unwrap();
        assert!(AssetSummaryProjector::list(&tx).await.unwrap().is_empty());
        uow.rollback(tx).await.unwrap();
    }
}

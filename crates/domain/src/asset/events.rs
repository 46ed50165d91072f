//! Asset domain events.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

use super::{AssetId, AssetKind, Currency, Money};

pub const ASSET_CREATED: &str = "AssetCreated_V1";
pub const ASSET_RENAMED: &str = "AssetRenamed_V1";
pub const VALUATION_RECORDED: &str = "ValuationRecorded_V1";
pub const ASSET_DELETED: &str = "AssetDeleted_V1";

/// Events that can occur on an asset aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AssetEvent {
    #[serde(rename = "AssetCreated_V1")]
    AssetCreated(AssetCreatedData),

    #[serde(rename = "AssetRenamed_V1")]
    AssetRenamed(AssetRenamedData),

    #[serde(rename = "ValuationRecorded_V1")]
    ValuationRecorded(ValuationRecordedData),

    /// Logical deletion; the asset stays loadable.
    #[serde(rename = "AssetDeleted_V1")]
    AssetDeleted(AssetDeletedData),
}

impl DomainEvent for AssetEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AssetEvent::AssetCreated(_) => ASSET_CREATED,
            AssetEvent::AssetRenamed(_) => ASSET_RENAMED,
            AssetEvent::ValuationRecorded(_) => VALUATION_RECORDED,
            AssetEvent::AssetDeleted(_) => ASSET_DELETED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetCreatedData {
    pub asset_id: AssetId,
    pub name: String,
    pub kind: AssetKind,
    pub currency: Currency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRenamedData {
    pub previous_name: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationRecordedData {
    pub amount: Money,
    pub as_of: NaiveDate,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDeletedData {
    pub deleted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

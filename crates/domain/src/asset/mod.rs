//! Asset aggregate: a sample domain driven through the command kernel.

mod aggregate;
mod commands;
pub mod events;
mod service;
mod value_objects;

pub use aggregate::Asset;
pub use commands::{
    AssetCommand, CreateAsset, CreateAssetPayload, DeleteAsset, DeleteAssetPayload,
    RecordValuation, RecordValuationPayload, UnknownAssetCommand, UpdateAsset, UpdateAssetPayload,
};
pub use events::AssetEvent;
pub use service::{AssetService, asset_commands, decode_view};
pub use value_objects::{AssetKind, Currency, Money, Valuation};

use common::TypedId;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;

pub type AssetId = TypedId<Asset>;

/// Violation keys raised by asset invariants.
pub mod rules {
    pub const NAME_REQUIRED: &str = "name_required";
    pub const CURRENCY_INVALID: &str = "currency_invalid";
    pub const CURRENCY_MISMATCH: &str = "currency_mismatch";
    pub const AMOUNT_NEGATIVE: &str = "amount_negative";
    pub const VALUATION_IN_FUTURE: &str = "valuation_in_future";
    pub const ASSET_DELETED: &str = "asset_deleted";
}

/// Response returned by every asset command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetView {
    pub id: AssetId,
    pub name: String,
    pub kind: AssetKind,
    pub currency: Currency,
    pub valuation_count: usize,
    pub latest_valuation: Option<Money>,
    pub deleted: bool,
}

impl From<&Asset> for AssetView {
    fn from(asset: &Asset) -> Self {
        Self {
            id: asset.id().clone().into(),
            name: asset.name().to_string(),
            kind: asset.kind(),
            currency: asset.currency().clone(),
            valuation_count: asset.valuations().len(),
            latest_valuation: asset.latest_valuation().map(|v| v.amount.clone()),
            deleted: asset.is_deleted(),
        }
    }
}

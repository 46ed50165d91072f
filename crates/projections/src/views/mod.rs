//! Read models maintained inside command transactions.

pub mod asset_summary;

pub use asset_summary::{AssetSummary, AssetSummaryProjector, PgAssetSummaryProjector};

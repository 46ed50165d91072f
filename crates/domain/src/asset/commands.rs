//! Asset command definitions.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use common::{Clock, IdGenerator};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{Command, CommandOutput, require_existing, require_new};
use crate::error::CommandError;

use super::{Asset, AssetKind, AssetView};

/// Names of the commands an asset accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssetCommand {
    Create,
    Update,
    RecordValuation,
    Delete,
}

impl AssetCommand {
    pub const ALL: [AssetCommand; 4] = [
        AssetCommand::Create,
        AssetCommand::Update,
        AssetCommand::RecordValuation,
        AssetCommand::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetCommand::Create => "asset.create",
            AssetCommand::Update => "asset.update",
            AssetCommand::RecordValuation => "asset.record_valuation",
            AssetCommand::Delete => "asset.delete",
        }
    }
}

impl fmt::Display for AssetCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown asset command: {0}")]
pub struct UnknownAssetCommand(pub String);

impl FromStr for AssetCommand {
    type Err = UnknownAssetCommand;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| UnknownAssetCommand(s.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAssetPayload {
    pub name: String,
    #[serde(default)]
    pub kind: AssetKind,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateAssetPayload {
    pub name: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordValuationPayload {
    pub amount_minor: i64,
    pub currency: String,
    pub as_of: NaiveDate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteAssetPayload {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Creates an asset under a freshly generated id.
pub struct CreateAsset {
    ids: Arc<dyn IdGenerator>,
}

impl CreateAsset {
    pub fn new(ids: Arc<dyn IdGenerator>) -> Self {
        Self { ids }
    }
}

impl Command<Asset> for CreateAsset {
    type Payload = CreateAssetPayload;
    type Response = AssetView;

    fn execute(
        &self,
        payload: CreateAssetPayload,
        aggregate: Option<Asset>,
    ) -> Result<CommandOutput<Asset, AssetView>, CommandError> {
        require_new(aggregate)?;
        let asset = Asset::create(
            self.ids.next_id(),
            &payload.name,
            payload.kind,
            &payload.currency,
        )?;
        let view = AssetView::from(&asset);
        Ok(CommandOutput::new(asset, view))
    }
}

/// Renames an asset; the currency must be restated unchanged.
pub struct UpdateAsset;

impl Command<Asset> for UpdateAsset {
    type Payload = UpdateAssetPayload;
    type Response = AssetView;

    fn execute(
        &self,
        payload: UpdateAssetPayload,
        aggregate: Option<Asset>,
    ) -> Result<CommandOutput<Asset, AssetView>, CommandError> {
        let mut asset = require_existing(aggregate)?;
        asset.update_details(&payload.name, &payload.currency)?;
        let view = AssetView::from(&asset);
        Ok(CommandOutput::new(asset, view))
    }
}

pub struct RecordValuation {
    clock: Arc<dyn Clock>,
}

impl RecordValuation {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Command<Asset> for RecordValuation {
    type Payload = RecordValuationPayload;
    type Response = AssetView;

    fn execute(
        &self,
        payload: RecordValuationPayload,
        aggregate: Option<Asset>,
    ) -> Result<CommandOutput<Asset, AssetView>, CommandError> {
        let mut asset = require_existing(aggregate)?;
        asset.record_valuation(
            payload.amount_minor,
            &payload.currency,
            payload.as_of,
            self.clock.now(),
        )?;
        let view = AssetView::from(&asset);
        Ok(CommandOutput::new(asset, view))
    }
}

pub struct DeleteAsset {
    clock: Arc<dyn Clock>,
}

impl DeleteAsset {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Command<Asset> for DeleteAsset {
    type Payload = DeleteAssetPayload;
    type Response = AssetView;

    fn execute(
        &self,
        payload: DeleteAssetPayload,
        aggregate: Option<Asset>,
    ) -> Result<CommandOutput<Asset, AssetView>, CommandError> {
        let mut asset = require_existing(aggregate)?;
        asset.delete(payload.reason, self.clock.now())?;
        let view = AssetView::from(&asset);
        Ok(CommandOutput::new(asset, view))
    }
}

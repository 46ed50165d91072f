//! Typed facade over the asset command handler.

use std::sync::Arc;

use common::{AggregateId, Clock, EdgeError, IdGenerator};
use serde::Serialize;
use serde_json::Value;
use store::UnitOfWork;

use crate::command::CommandRegistry;
use crate::handler::{CommandHandler, CommandRequest};

use super::{
    Asset, AssetCommand, AssetView, CreateAsset, CreateAssetPayload, DeleteAsset,
    DeleteAssetPayload, RecordValuation, RecordValuationPayload, UpdateAsset, UpdateAssetPayload,
};

/// Registry holding every asset command.
pub fn asset_commands(
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
) -> CommandRegistry<Asset, AssetCommand> {
    CommandRegistry::new()
        .register(AssetCommand::Create, CreateAsset::new(ids))
        .register(AssetCommand::Update, UpdateAsset)
        .register(AssetCommand::RecordValuation, RecordValuation::new(clock.clone()))
        .register(AssetCommand::Delete, DeleteAsset::new(clock))
}

/// Service for managing assets.
///
/// Wraps the generic handler so callers work with payload structs and
/// [`AssetView`] instead of raw JSON.
pub struct AssetService<U: UnitOfWork> {
    handler: CommandHandler<U, Asset, AssetCommand>,
}

impl<U: UnitOfWork> AssetService<U> {
    pub fn new(handler: CommandHandler<U, Asset, AssetCommand>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &CommandHandler<U, Asset, AssetCommand> {
        &self.handler
    }

    #[tracing::instrument(skip(self, payload), fields(name = %payload.name))]
    pub async fn create(&self, payload: CreateAssetPayload) -> Result<AssetView, EdgeError> {
        self.run(AssetCommand::Create, None, &payload).await
    }

    #[tracing::instrument(skip(self, payload))]
    pub async fn update(
        &self,
        id: AggregateId,
        payload: UpdateAssetPayload,
    ) -> Result<AssetView, EdgeError> {
        self.run(AssetCommand::Update, Some(id), &payload).await
    }

    #[tracing::instrument(skip(self, payload))]
    pub async fn record_valuation(
        &self,
        id: AggregateId,
        payload: RecordValuationPayload,
    ) -> Result<AssetView, EdgeError> {
        self.run(AssetCommand::RecordValuation, Some(id), &payload)
            .await
    }

    #[tracing::instrument(skip(self, payload))]
    pub async fn delete(
        &self,
        id: AggregateId,
        payload: DeleteAssetPayload,
    ) -> Result<AssetView, EdgeError> {
        self.run(AssetCommand::Delete, Some(id), &payload).await
    }

    async fn run<P: Serialize>(
        &self,
        name: AssetCommand,
        id: Option<AggregateId>,
        payload: &P,
    ) -> Result<AssetView, EdgeError> {
        let payload = serde_json::to_value(payload)
            .map_err(|e| EdgeError::bad_request(format!("Unencodable payload: {e}")))?;
        let request = CommandRequest {
            aggregate_id: id,
            payload,
        };
        let response = self.handler.execute(name, request).await?;
        decode_view(response)
    }
}

/// Reads an [`AssetView`] back out of a command response.
pub fn decode_view(response: Value) -> Result<AssetView, EdgeError> {
    serde_json::from_value(response)
        .map_err(|e| EdgeError::infrastructure(format!("Malformed asset response: {e}")))
}

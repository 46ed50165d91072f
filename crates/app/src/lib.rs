//! Wiring and a scripted walk through the command kernel.
//!
//! [`Kernel`] assembles the asset command handler, its projections and the
//! idempotency wrapper over one unit of work. [`run_scenario`] drives it the
//! way a client would and reports what happened.

pub mod config;
pub mod error;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{Clock, EdgeError, EdgeErrorKind, IdGenerator, SystemClock, UuidIdGenerator};
use domain::asset::{
    AssetView, CreateAssetPayload, DeleteAssetPayload, RecordValuationPayload, UpdateAssetPayload,
    decode_view,
};
use domain::{
    AggregateRepository, Asset, AssetCommand, AssetService, CommandHandler, CommandRequest,
    PostgresStateRepository, StateRepository, asset_commands,
};
use idempotency::{
    IdempotencyRequest, IdempotencyStore, IdempotentExecutor, InMemoryIdempotencyStore,
    PostgresIdempotencyStore,
};
use projections::{
    AssetSummary, AssetSummaryProjector, PgAssetSummaryProjector, ProjectionManager, Projector,
};
use serde_json::json;
use store::{InMemoryUnitOfWork, PostgresUnitOfWork, UnitOfWork, with_transaction};

pub use config::{Config, LogFormat};
pub use error::{DemoError, StepContext};

/// The asset command pipeline over one unit of work.
pub struct Kernel<U: UnitOfWork> {
    assets: AssetService<U>,
    idempotency: IdempotentExecutor<U>,
}

/// Everything a [`Kernel`] is assembled from.
pub struct KernelParts<U: UnitOfWork> {
    pub uow: Arc<U>,
    pub repository: Arc<dyn AggregateRepository<Asset, U::Tx>>,
    pub idempotency: Arc<dyn IdempotencyStore<U::Tx>>,
    pub projectors: Vec<Arc<dyn Projector<U::Tx>>>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

impl<U: UnitOfWork> Kernel<U> {
    pub fn new(parts: KernelParts<U>) -> Result<Self, DemoError> {
        let mut manager = ProjectionManager::new();
        for projector in parts.projectors {
            manager.register(projector).map_err(|e| DemoError::Unexpected {
                step: "wiring",
                detail: e.to_string(),
            })?;
        }

        let handler = CommandHandler::new(
            Arc::clone(&parts.uow),
            parts.repository,
            asset_commands(parts.ids, Arc::clone(&parts.clock)),
        )
        .with_publisher(Arc::new(manager));

        Ok(Self {
            assets: AssetService::new(handler),
            idempotency: IdempotentExecutor::new(parts.uow, parts.idempotency)
                .with_clock(parts.clock),
        })
    }

    pub fn assets(&self) -> &AssetService<U> {
        &self.assets
    }

    /// Creates an asset at most once per `key`.
    pub async fn create_asset_once(
        &self,
        key: &str,
        payload: CreateAssetPayload,
    ) -> Result<AssetView, EdgeError> {
        let body = serde_json::to_value(&payload)
            .map_err(|e| EdgeError::bad_request(format!("Unserializable payload: {e}")))?;
        let request = IdempotencyRequest::new(AssetCommand::Create.as_str(), body.clone())
            .with_key(key)
            .with_scope(json!({ "client": "kernel-demo" }));

        let response = self
            .idempotency
            .execute(request, |tx| async move {
                self.assets
                    .handler()
                    .execute_in(&tx, AssetCommand::Create, CommandRequest::create(body))
                    .await
            })
            .await?;
        decode_view(response)
    }
}

impl Kernel<InMemoryUnitOfWork> {
    pub fn in_memory(config: &Config) -> Result<(Self, Arc<InMemoryUnitOfWork>), DemoError> {
        let uow = Arc::new(InMemoryUnitOfWork::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let kernel = Self::new(KernelParts {
            uow: Arc::clone(&uow),
            repository: Arc::new(StateRepository::<Asset>::new(Arc::clone(&clock))),
            idempotency: Arc::new(InMemoryIdempotencyStore::new(config.idempotency_lease())),
            projectors: vec![Arc::new(AssetSummaryProjector) as Arc<dyn Projector<_>>],
            clock,
            ids: Arc::new(UuidIdGenerator),
        })?;
        Ok((kernel, uow))
    }
}

impl Kernel<PostgresUnitOfWork> {
    pub async fn postgres(
        config: &Config,
        database_url: &str,
    ) -> Result<(Self, Arc<PostgresUnitOfWork>), DemoError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(database_url)
            .await?;
        let uow = Arc::new(PostgresUnitOfWork::new(pool));
        uow.run_migrations().await?;
        tracing::info!("database migrated");

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let kernel = Self::new(KernelParts {
            uow: Arc::clone(&uow),
            repository: Arc::new(PostgresStateRepository::<Asset>::new(Arc::clone(&clock))),
            idempotency: Arc::new(PostgresIdempotencyStore::new(config.idempotency_lease())),
            projectors: vec![Arc::new(PgAssetSummaryProjector) as Arc<dyn Projector<_>>],
            clock,
            ids: Arc::new(UuidIdGenerator),
        })?;
        Ok((kernel, uow))
    }
}

/// Reads the asset summary read model of a store.
#[async_trait]
pub trait SummaryReader: UnitOfWork {
    async fn asset_summary(&self, asset_id: &str) -> Result<Option<AssetSummary>, DemoError>;
}

#[async_trait]
impl SummaryReader for InMemoryUnitOfWork {
    async fn asset_summary(&self, asset_id: &str) -> Result<Option<AssetSummary>, DemoError> {
        with_transaction(self, |tx| async move {
            AssetSummaryProjector::get(&tx, asset_id)
                .await
                .map_err(read_failed)
        })
        .await
    }
}

#[async_trait]
impl SummaryReader for PostgresUnitOfWork {
    async fn asset_summary(&self, asset_id: &str) -> Result<Option<AssetSummary>, DemoError> {
        with_transaction(self, |tx| async move {
            PgAssetSummaryProjector::get(&tx, asset_id)
                .await
                .map_err(read_failed)
        })
        .await
    }
}

fn read_failed(err: projections::ProjectionError) -> DemoError {
    DemoError::Unexpected {
        step: "read summary",
        detail: err.to_string(),
    }
}

/// What the scripted scenario observed.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub asset: AssetView,
    pub replayed_identically: bool,
    /// Scripted rejections and the error kind each produced.
    pub rejections: Vec<(&'static str, EdgeErrorKind)>,
    pub summary: Option<AssetSummary>,
}

/// Creates an asset twice under one idempotency key, values and renames it,
/// sends an invalid update, deletes it, tries to value it once more and
/// reads back the summary.
#[tracing::instrument(skip_all, fields(run = %run_id))]
pub async fn run_scenario<U: SummaryReader>(
    kernel: &Kernel<U>,
    reader: &U,
    run_id: &str,
) -> Result<ScenarioReport, DemoError> {
    let key = format!("{run_id}-create");
    let create = CreateAssetPayload {
        name: "Harbour loft".into(),
        kind: domain::asset::AssetKind::RealEstate,
        currency: "EUR".into(),
    };

    let first = kernel
        .create_asset_once(&key, create.clone())
        .await
        .step("create")?;
    let again = kernel
        .create_asset_once(&key, create)
        .await
        .step("create again")?;
    let id = first.id.clone().into_inner();
    tracing::info!(asset_id = %id, replayed = first == again, "asset created");

    let assets = kernel.assets();
    for (amount_minor, day) in [(48_500_000, 1), (51_000_000, 2)] {
        assets
            .record_valuation(
                id.clone(),
                RecordValuationPayload {
                    amount_minor,
                    currency: "EUR".into(),
                    as_of: first_of_month(day)?,
                },
            )
            .await
            .step("record valuation")?;
    }
    assets
        .update(
            id.clone(),
            UpdateAssetPayload {
                name: "Harbour loft, unit 4".into(),
                currency: "EUR".into(),
            },
        )
        .await
        .step("rename")?;

    let mut rejections = Vec::new();
    let wrong_currency = assets
        .update(
            id.clone(),
            UpdateAssetPayload {
                name: String::new(),
                currency: "usd".into(),
            },
        )
        .await;
    rejections.push(("invalid update", expect_rejection("invalid update", wrong_currency)?));

    let asset = assets
        .delete(
            id.clone(),
            DeleteAssetPayload {
                reason: Some("sold".into()),
            },
        )
        .await
        .step("delete")?;

    let after_delete = assets
        .record_valuation(
            id.clone(),
            RecordValuationPayload {
                amount_minor: 1,
                currency: "EUR".into(),
                as_of: first_of_month(3)?,
            },
        )
        .await;
    rejections.push((
        "valuation after delete",
        expect_rejection("valuation after delete", after_delete)?,
    ));

    let summary = reader.asset_summary(&id.to_string()).await?;
    tracing::info!(
        valuations = asset.valuation_count,
        rejected = rejections.len(),
        "scenario finished"
    );

    Ok(ScenarioReport {
        asset,
        replayed_identically: first == again,
        rejections,
        summary,
    })
}

fn first_of_month(month: u32) -> Result<NaiveDate, DemoError> {
    NaiveDate::from_ymd_opt(2024, month, 1).ok_or(DemoError::Unexpected {
        step: "record valuation",
        detail: format!("invalid month {month}"),
    })
}

fn expect_rejection<T>(
    step: &'static str,
    result: Result<T, EdgeError>,
) -> Result<EdgeErrorKind, DemoError> {
    match result {
        Ok(_) => Err(DemoError::Unexpected {
            step,
            detail: "command was accepted".into(),
        }),
        Err(err) if err.is_retryable() => Err(DemoError::Step { step, source: err }),
        Err(err) => {
            tracing::info!(step, error = %err, "rejected as expected");
            Ok(err.kind())
        }
    }
}

//! Asset pipeline against PostgreSQL.
//!
//! Needs a Docker daemon. Run with:
//!
//! ```bash
//! cargo test -p domain --test postgres_repository -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use common::{EdgeError, EdgeErrorKind, SequentialIdGenerator, SystemClock};
use domain::asset::{AssetKind, CreateAssetPayload, UpdateAssetPayload};
use domain::{
    AggregateRepository, Asset, AssetCommand, AssetService, CommandHandler, CommandRequest,
    PostgresStateRepository, RepositoryError, asset_commands,
};
use serial_test::serial;
use sqlx::PgPool;
use store::{PgTx, PostgresUnitOfWork, UnitOfWork, Version};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_kernel_tables.sql"
            ))
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn test_uow() -> Arc<PostgresUnitOfWork> {
    let info = container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE TABLE events, aggregates, idempotency_keys, asset_summaries")
        .execute(&pool)
        .await
        .unwrap();
    Arc::new(PostgresUnitOfWork::new(pool))
}

fn handler(uow: &Arc<PostgresUnitOfWork>) -> CommandHandler<PostgresUnitOfWork, Asset, AssetCommand> {
    CommandHandler::new(
        Arc::clone(uow),
        Arc::new(PostgresStateRepository::<Asset>::default()),
        asset_commands(
            Arc::new(SequentialIdGenerator::new("asset")),
            Arc::new(SystemClock),
        ),
    )
}

async fn count(uow: &PostgresUnitOfWork, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(uow.pool())
        .await
        .unwrap()
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn create_and_update_bump_versions() {
    let uow = test_uow().await;
    let service = AssetService::new(handler(&uow));

    let id = service
        .create(CreateAssetPayload {
            name: "Loft".into(),
            kind: AssetKind::RealEstate,
            currency: "EUR".into(),
        })
        .await
        .unwrap()
        .id
        .into_inner();
    let view = service
        .update(
            id.clone(),
            UpdateAssetPayload {
                name: "Harbour loft".into(),
                currency: "EUR".into(),
            },
        )
        .await
        .unwrap();
    assert_eq!(view.name, "Harbour loft");

    let version: i64 = sqlx::query_scalar(
        "SELECT version FROM aggregates WHERE aggregate_type = 'Asset' AND aggregate_id = $1",
    )
    .bind(id.as_str())
    .fetch_one(uow.pool())
    .await
    .unwrap();
    assert_eq!(version, 2);
    assert_eq!(count(&uow, "events").await, 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn invariant_failure_leaves_no_rows() {
    let uow = test_uow().await;
    let handler = handler(&uow);

    let err = handler
        .execute_named(
            "asset.create",
            CommandRequest::create(serde_json::json!({"name": "", "currency": "eur"})),
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), EdgeErrorKind::InvariantViolation);
    assert_eq!(count(&uow, "aggregates").await, 0);
    assert_eq!(count(&uow, "events").await, 0);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn stale_update_is_a_conflict() {
    let uow = test_uow().await;
    let handler = handler(&uow);
    let created = handler
        .execute_named(
            "asset.create",
            CommandRequest::create(serde_json::json!({"name": "Loft", "currency": "EUR"})),
        )
        .await
        .unwrap();
    let id = common::AggregateId::parse(created["id"].as_str().unwrap()).unwrap();

    let repository = PostgresStateRepository::<Asset>::default();
    let first: PgTx = uow.begin().await.unwrap();
    let second: PgTx = uow.begin().await.unwrap();
    let mut winner = repository.find_by_id(&first, &id).await.unwrap().unwrap();
    let mut loser = repository.find_by_id(&second, &id).await.unwrap().unwrap();

    winner.update_details("North loft", "EUR").unwrap();
    repository.save(&first, &mut winner).await.unwrap();
    uow.commit(first).await.unwrap();

    loser.update_details("South loft", "EUR").unwrap();
    let err = repository.save(&second, &mut loser).await.unwrap_err();
    assert!(matches!(
        err,
        RepositoryError::Conflict { expected, actual, .. }
            if expected == Version::new(1) && actual == Version::new(2)
    ));
    assert_eq!(EdgeError::from(err).kind(), EdgeErrorKind::Conflict);

    uow.rollback(second).await.unwrap();
    assert_eq!(count(&uow, "events").await, 2);
}

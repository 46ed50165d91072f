//! PostgreSQL idempotency store tests.
//!
//! Needs a Docker daemon. Run with:
//!
//! ```bash
//! cargo test -p idempotency --test postgres_store -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use idempotency::{
    ClaimOutcome, ClaimRequest, IdempotencyError, IdempotencyStore, PostgresIdempotencyStore,
};
use serde_json::json;
use serial_test::serial;
use sqlx::PgPool;
use store::{PostgresUnitOfWork, UnitOfWork};
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

async fn test_uow() -> PostgresUnitOfWork {
    let info = container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();
    sqlx::query("TRUNCATE TABLE idempotency_keys")
        .execute(&pool)
        .await
        .unwrap();
    PostgresUnitOfWork::new(pool)
}

fn claim(payload_hash: &str, seconds: i64) -> ClaimRequest {
    ClaimRequest {
        key: "k-1".into(),
        command: "asset.create".into(),
        scope_hash: "scope".into(),
        payload_hash: payload_hash.into(),
        now: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(seconds),
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn claim_complete_replay() {
    let uow = test_uow().await;
    let idem = PostgresIdempotencyStore::default();

    let tx = uow.begin().await.unwrap();
    assert_eq!(idem.try_claim(&tx, &claim("p", 0)).await.unwrap(), ClaimOutcome::Claimed);
    idem.save_response(&tx, &claim("p", 0).record_key(), &json!({"id": "asset-1"}), claim("p", 1).now)
        .await
        .unwrap();
    uow.commit(tx).await.unwrap();

    let tx = uow.begin().await.unwrap();
    assert_eq!(
        idem.try_claim(&tx, &claim("p", 5)).await.unwrap(),
        ClaimOutcome::Replay(json!({"id": "asset-1"}))
    );
    assert!(idem.try_claim(&tx, &claim("other", 5)).await.is_err());
    uow.rollback(tx).await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn expired_claim_is_taken_over() {
    let uow = test_uow().await;
    let idem = PostgresIdempotencyStore::new(Duration::seconds(10));

    let tx = uow.begin().await.unwrap();
    idem.try_claim(&tx, &claim("p", 0)).await.unwrap();
    uow.commit(tx).await.unwrap();

    let tx = uow.begin().await.unwrap();
    assert!(matches!(
        idem.try_claim(&tx, &claim("p", 5)).await.unwrap(),
        ClaimOutcome::InFlight { .. }
    ));
    assert_eq!(idem.try_claim(&tx, &claim("p", 20)).await.unwrap(), ClaimOutcome::Claimed);
    uow.commit(tx).await.unwrap();
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn rolled_back_claim_disappears() {
    let uow = test_uow().await;
    let idem = PostgresIdempotencyStore::default();

    let tx = uow.begin().await.unwrap();
    idem.try_claim(&tx, &claim("p", 0)).await.unwrap();
    uow.rollback(tx).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM idempotency_keys")
        .fetch_one(uow.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
#[serial]
#[ignore = "requires docker"]
async fn completed_record_keeps_its_first_response() {
    let uow = test_uow().await;
    let idem = PostgresIdempotencyStore::default();
    let key = claim("p", 0).record_key();

    let tx = uow.begin().await.unwrap();
    idem.try_claim(&tx, &claim("p", 0)).await.unwrap();
    idem.save_response(&tx, &key, &json!(null), claim("p", 1).now)
        .await
        .unwrap();
    uow.commit(tx).await.unwrap();

    let tx = uow.begin().await.unwrap();
    let err = idem
        .save_response(&tx, &key, &json!("second"), claim("p", 2).now)
        .await
        .unwrap_err();
    assert!(matches!(err, IdempotencyError::AlreadyCompleted { .. }));
    uow.rollback(tx).await.unwrap();

    let tx = uow.begin().await.unwrap();
    assert_eq!(
        idem.try_claim(&tx, &claim("p", 3600)).await.unwrap(),
        ClaimOutcome::Replay(json!(null))
    );
    uow.rollback(tx).await.unwrap();
}

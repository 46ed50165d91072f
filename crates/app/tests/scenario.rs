//! The scripted scenario over the in-memory kernel.

use common::EdgeErrorKind;
use domain::asset::CreateAssetPayload;
use kernel_demo::{Config, Kernel, run_scenario};

#[tokio::test]
async fn scenario_runs_end_to_end_in_memory() {
    let (kernel, uow) = Kernel::in_memory(&Config::default()).unwrap();

    let report = run_scenario(&kernel, uow.as_ref(), "test").await.unwrap();

    assert!(report.replayed_identically);
    assert!(report.asset.deleted);
    assert_eq!(report.asset.valuation_count, 2);
    assert_eq!(
        report.rejections,
        vec![
            ("invalid update", EdgeErrorKind::InvariantViolation),
            ("valuation after delete", EdgeErrorKind::InvariantViolation),
        ]
    );

    let summary = report.summary.unwrap();
    assert_eq!(summary.name, "Harbour loft, unit 4");
    assert_eq!(summary.latest_valuation, Some(51_000_000));
    assert!(summary.deleted);

    // create, two valuations, rename, delete
    assert_eq!(uow.event_count().await, 5);
    assert_eq!(uow.rows("idempotency_keys").await.len(), 1);
}

#[tokio::test]
async fn idempotent_create_runs_once_per_key() {
    let (kernel, uow) = Kernel::in_memory(&Config::default()).unwrap();
    let payload = CreateAssetPayload {
        name: "Boat".into(),
        kind: Default::default(),
        currency: "NOK".into(),
    };

    let first = kernel.create_asset_once("k-1", payload.clone()).await.unwrap();
    let second = kernel.create_asset_once("k-1", payload.clone()).await.unwrap();
    let other = kernel.create_asset_once("k-2", payload).await.unwrap();

    assert_eq!(first, second);
    assert_ne!(first.id, other.id);
    assert_eq!(uow.rows("Asset").await.len(), 2);
}

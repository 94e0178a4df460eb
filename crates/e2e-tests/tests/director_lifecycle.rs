//! Director idempotency and lifecycle scenarios.

use stratoflow_core::hydration::short_token;
use stratoflow_core::provisioning::{ItemOutcome, ProvisionReport};
use stratoflow_core::LifecycleStrategy;
use stratoflow_e2e_tests::fixtures::{self, FlowNames};
use stratoflow_e2e_tests::helpers::{logging, start_director};

#[tokio::test]
async fn second_setup_performs_no_mutation() {
    logging::init();
    let names = FlowNames::for_run(&short_token());
    let arch = fixtures::warehouse_flow(&names, LifecycleStrategy::Ephemeral);
    let harness = start_director(&arch).await;

    let first = harness.setup(&names.dataflow).await;
    assert_eq!(first.status(), 200);
    let first: ProvisionReport = first.json().await.unwrap();
    assert!(first.created_count() > 0);

    let second = harness.setup(&names.dataflow).await;
    assert_eq!(second.status(), 200, "repeated setup must succeed");
    let second: ProvisionReport = second.json().await.unwrap();
    // Observable idempotency: the second pass reports no creations.
    assert_eq!(second.created_count(), 0);
    assert_eq!(second.items.len(), first.items.len());
}

#[tokio::test]
async fn teardown_leaves_permanent_dataflow_intact() {
    logging::init();
    let names = FlowNames::for_run(&short_token());
    let arch = fixtures::warehouse_flow(&names, LifecycleStrategy::Permanent);
    let harness = start_director(&arch).await;

    assert_eq!(harness.setup("all").await.status(), 200);
    assert!(harness.bus.topic_exists(&names.ingest_topic));

    let resp = harness.teardown().await;
    assert_eq!(resp.status(), 200);
    let report: ProvisionReport = resp.json().await.unwrap();
    assert!(!report.items.is_empty());
    for item in &report.items {
        assert_eq!(
            item.outcome,
            ItemOutcome::SkippedPermanent,
            "{} {} must be skipped",
            item.kind,
            item.name
        );
    }

    // Every listed resource is still there.
    assert!(harness.bus.topic_exists(&names.ingest_topic));
    assert!(harness
        .bus
        .subscription_topic(&names.ingest_subscription)
        .is_some());
    assert!(harness
        .cloud
        .table_rows(&names.dataset, &names.table)
        .is_some());
}

#[tokio::test]
async fn healthz_reports_ready_state() {
    logging::init();
    let names = FlowNames::for_run(&short_token());
    let arch = fixtures::warehouse_flow(&names, LifecycleStrategy::Ephemeral);
    let harness = start_director(&arch).await;

    let resp = harness.healthz().await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["state"], "READY");
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn unknown_dataflow_setup_is_not_found() {
    logging::init();
    let names = FlowNames::for_run(&short_token());
    let arch = fixtures::warehouse_flow(&names, LifecycleStrategy::Ephemeral);
    let harness = start_director(&arch).await;

    let resp = harness.setup("no-such-flow").await;
    assert_eq!(resp.status(), 404);
}

//! Ingest -> archive scenario: batched NDJSON objects under a prefix.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use stratoflow_core::hydration::short_token;
use stratoflow_core::LifecycleStrategy;
use stratoflow_e2e_tests::fixtures::{self, FlowNames};
use stratoflow_e2e_tests::helpers::{
    count_archive_records, logging, start_director, wait_for, Device, LoadGenerator,
};
use stratoflow_e2e_tests::services::{archive_pipeline, ingestion_pipeline};
use stratoflow_ports::messaging::TopicPublisher;
use stratoflow_ports::stores::ObjectStore;

const VERIFY_DEADLINE: Duration = Duration::from_secs(180);
const ARCHIVE_PREFIX: &str = "telemetry";

#[tokio::test]
async fn ingest_to_archive_preserves_every_record() {
    logging::init();
    let run_id = short_token();
    let names = FlowNames::for_run(&run_id);
    let arch = fixtures::archive_flow(&names, LifecycleStrategy::Ephemeral);
    let harness = start_director(&arch).await;

    let resp = harness.setup("all").await;
    assert_eq!(resp.status(), 200);

    let device_topic = format!("devices-{run_id}");
    let device_sub = format!("devices-{run_id}-sub");
    harness.bus.create_topic(&device_topic);
    harness
        .bus
        .create_subscription(&device_sub, &device_topic)
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingestion = ingestion_pipeline(&harness.bus, &device_sub, &names.ingest_topic)
        .await
        .unwrap();
    let archive = archive_pipeline(
        &harness.cloud,
        &names.ingest_subscription,
        &names.bucket,
        ARCHIVE_PREFIX,
    )
    .await
    .unwrap();
    let ingestion_task = tokio::spawn(ingestion.run(shutdown_rx.clone()));
    let archive_task = tokio::spawn(archive.run(shutdown_rx));

    // 2 devices x 5 msg/s x 3 s = 30 messages.
    let devices: Vec<Device> = (0..2)
        .map(|i| Device {
            id: format!("e2e-archive-device-{i}-{run_id}"),
            message_rate: 5.0,
        })
        .collect();
    let generator = LoadGenerator::new(
        Arc::clone(&harness.bus) as Arc<dyn TopicPublisher>,
        &device_topic,
        devices,
    );
    let expected = generator.expected_messages_for(Duration::from_secs(3));
    assert_eq!(expected, 30);
    let published = generator.run(Duration::from_secs(3)).await.unwrap();
    assert_eq!(published, expected);

    let cloud = Arc::clone(&harness.cloud);
    let bucket = names.bucket.clone();
    let reached = wait_for(VERIFY_DEADLINE, Duration::from_millis(100), move || {
        let cloud = Arc::clone(&cloud);
        let bucket = bucket.clone();
        async move { count_archive_records(&cloud, &bucket, ARCHIVE_PREFIX).await >= published }
    })
    .await;
    assert!(reached, "archive should hold {published} records within the deadline");

    // Batching may have split the load across fewer, larger objects; the
    // record total is what must be conserved.
    let store = stratoflow_adapters::InMemoryObjectStore::new(Arc::clone(&harness.cloud));
    let objects = store
        .list_objects(&names.bucket, ARCHIVE_PREFIX)
        .await
        .unwrap();
    assert!(!objects.is_empty());
    assert_eq!(
        count_archive_records(&harness.cloud, &names.bucket, ARCHIVE_PREFIX).await,
        published
    );

    shutdown_tx.send(true).unwrap();
    ingestion_task.await.unwrap().unwrap();
    archive_task.await.unwrap().unwrap();
}

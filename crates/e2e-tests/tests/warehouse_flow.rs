//! Ingest -> warehouse scenarios: plain append and enriched append.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use stratoflow_core::hydration::short_token;
use stratoflow_core::LifecycleStrategy;
use stratoflow_e2e_tests::fixtures::{self, FlowNames};
use stratoflow_e2e_tests::helpers::{
    logging, start_director, wait_for_row_count, Device, LoadGenerator,
};
use stratoflow_e2e_tests::services::{
    enrichment_pipeline, ingestion_pipeline, warehouse_pipeline, DeviceInfo,
};
use stratoflow_ports::messaging::TopicPublisher;
use stratoflow_ports::stores::KeyedStore;

const VERIFY_DEADLINE: Duration = Duration::from_secs(180);

/// External broker stand-in: the topic devices publish raw payloads to.
fn broker_channel(
    bus: &stratoflow_adapters::InMemoryPubSub,
    run_id: &str,
) -> (String, String) {
    let topic = format!("devices-{run_id}");
    let subscription = format!("devices-{run_id}-sub");
    bus.create_topic(&topic);
    bus.create_subscription(&subscription, &topic).expect("broker channel");
    (topic, subscription)
}

#[tokio::test]
async fn ingest_to_warehouse_appends_every_published_reading() {
    logging::init();
    let run_id = short_token();
    let names = FlowNames::for_run(&run_id);
    let arch = fixtures::warehouse_flow(&names, LifecycleStrategy::Ephemeral);
    let harness = start_director(&arch).await;

    let resp = harness.setup("all").await;
    assert_eq!(resp.status(), 200, "director setup call should succeed");

    let (device_topic, device_sub) = broker_channel(&harness.bus, &run_id);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingestion = ingestion_pipeline(&harness.bus, &device_sub, &names.ingest_topic)
        .await
        .unwrap();
    let warehouse = warehouse_pipeline(
        &harness.cloud,
        &names.ingest_subscription,
        &names.dataset,
        &names.table,
    )
    .await
    .unwrap();
    let ingestion_task = tokio::spawn(ingestion.run(shutdown_rx.clone()));
    let warehouse_task = tokio::spawn(warehouse.run(shutdown_rx));

    // 5 devices x 2 msg/s x 5 s = 50 messages.
    let devices: Vec<Device> = (0..5)
        .map(|i| Device {
            id: format!("e2e-bq-device-{i}-{run_id}"),
            message_rate: 2.0,
        })
        .collect();
    let device_ids: BTreeSet<String> = devices.iter().map(|d| d.id.clone()).collect();
    let generator = LoadGenerator::new(
        Arc::clone(&harness.bus) as Arc<dyn TopicPublisher>,
        &device_topic,
        devices,
    );
    let expected = generator.expected_messages_for(Duration::from_secs(5));
    assert_eq!(expected, 50);
    let published = generator.run(Duration::from_secs(5)).await.unwrap();
    assert_eq!(published, expected);

    assert!(
        wait_for_row_count(
            &harness.cloud,
            &names.dataset,
            &names.table,
            published,
            VERIFY_DEADLINE
        )
        .await,
        "warehouse should reach {published} rows within the deadline"
    );
    // Let in-flight flushes settle, then check conservation exactly.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let rows = harness
        .cloud
        .table_rows(&names.dataset, &names.table)
        .unwrap();
    assert_eq!(rows.len(), published, "published count equals appended row count");
    for row in &rows {
        let device_id = row["device_id"].as_str().unwrap();
        assert!(
            device_ids.contains(device_id),
            "row device id {device_id} was never published"
        );
    }

    shutdown_tx.send(true).unwrap();
    ingestion_task.await.unwrap().unwrap();
    warehouse_task.await.unwrap().unwrap();

    let resp = harness.teardown().await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn enrichment_fields_equal_seeded_device_records() {
    logging::init();
    let run_id = short_token();
    let names = FlowNames::for_run(&run_id);
    let arch = fixtures::enrichment_flow(&names, LifecycleStrategy::Ephemeral);
    let harness = start_director(&arch).await;

    let resp = harness.setup("all").await;
    assert_eq!(resp.status(), 200);

    // Seed the authoritative store with one record per device.
    let store: stratoflow_adapters::DocumentStore<DeviceInfo> =
        stratoflow_adapters::DocumentStore::new(Arc::clone(&harness.cloud), &names.collection);
    let mut seeded = std::collections::BTreeMap::new();
    for i in 0..3 {
        let id = format!("e2e-enrich-device-{i}-{run_id}");
        let info = DeviceInfo {
            client_id: format!("client-{i}"),
            location_id: format!("location-{i}"),
            category: format!("category-{i}"),
        };
        store.put(&id, &info).await.unwrap();
        seeded.insert(id, info);
    }

    let (device_topic, device_sub) = broker_channel(&harness.bus, &run_id);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingestion = ingestion_pipeline(&harness.bus, &device_sub, &names.ingest_topic)
        .await
        .unwrap();
    let enrichment = enrichment_pipeline(
        &harness.cloud,
        &names.ingest_subscription,
        &names.output_topic,
        &names.collection,
        &names.cache,
    )
    .await
    .unwrap();
    let warehouse = warehouse_pipeline(
        &harness.cloud,
        &names.output_subscription,
        &names.dataset,
        &names.table,
    )
    .await
    .unwrap();
    let tasks = vec![
        tokio::spawn(ingestion.run(shutdown_rx.clone())),
        tokio::spawn(enrichment.run(shutdown_rx.clone())),
        tokio::spawn(warehouse.run(shutdown_rx)),
    ];

    let devices: Vec<Device> = seeded
        .keys()
        .map(|id| Device {
            id: id.clone(),
            message_rate: 2.0,
        })
        .collect();
    let generator = LoadGenerator::new(
        Arc::clone(&harness.bus) as Arc<dyn TopicPublisher>,
        &device_topic,
        devices,
    );
    let published = generator.run(Duration::from_secs(3)).await.unwrap();
    assert!(published > 0);

    assert!(
        wait_for_row_count(
            &harness.cloud,
            &names.dataset,
            &names.table,
            published,
            VERIFY_DEADLINE
        )
        .await,
        "enriched rows should land within the deadline"
    );
    let rows = harness
        .cloud
        .table_rows(&names.dataset, &names.table)
        .unwrap();
    for row in &rows {
        let device_id = row["device_id"].as_str().unwrap();
        let info = &seeded[device_id];
        assert_eq!(row["client_id"].as_str(), Some(info.client_id.as_str()));
        assert_eq!(row["location_id"].as_str(), Some(info.location_id.as_str()));
        assert_eq!(row["category"].as_str(), Some(info.category.as_str()));
    }

    shutdown_tx.send(true).unwrap();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
}

//! Architecture fixtures for the end-to-end scenarios
//!
//! Every fixture derives its resource names from a run id so parallel test
//! runs never collide, mirroring how real runs scope ephemeral dataflows.

use std::collections::BTreeMap;

use stratoflow_core::architecture::*;
use stratoflow_core::hydration::hydrate;
use stratoflow_core::schema_registry::{self, FieldKind, FieldSchema, TableSchema};

pub const READING_SCHEMA: &str = "stratoflow.e2e.Reading";
pub const ENRICHED_SCHEMA: &str = "stratoflow.e2e.EnrichedReading";

/// Resource names of one scenario run.
#[derive(Debug, Clone)]
pub struct FlowNames {
    pub dataflow: String,
    pub ingest_topic: String,
    pub ingest_subscription: String,
    pub output_topic: String,
    pub output_subscription: String,
    pub dataset: String,
    pub table: String,
    pub bucket: String,
    pub collection: String,
    pub cache: String,
}

impl FlowNames {
    pub fn for_run(run_id: &str) -> Self {
        Self {
            dataflow: format!("flow-{run_id}"),
            ingest_topic: format!("ingestion-topic-{run_id}"),
            ingest_subscription: format!("ingestion-topic-{run_id}-sub"),
            output_topic: format!("enriched-topic-{run_id}"),
            output_subscription: format!("enriched-topic-{run_id}-sub"),
            dataset: format!("dataflow_dataset_{run_id}"),
            table: format!("ingested_payloads_{run_id}"),
            bucket: format!("archive-{run_id}"),
            collection: format!("devices-{run_id}"),
            cache: format!("device-cache-{run_id}"),
        }
    }
}

pub fn register_schemas() {
    schema_registry::register_schema(
        READING_SCHEMA,
        TableSchema::new(vec![
            FieldSchema::required("device_id", FieldKind::String),
            FieldSchema::required("timestamp", FieldKind::Timestamp),
            FieldSchema::required("value", FieldKind::Float),
        ]),
    )
    .expect("reading schema registers");
    schema_registry::register_schema(
        ENRICHED_SCHEMA,
        TableSchema::new(vec![
            FieldSchema::required("device_id", FieldKind::String),
            FieldSchema::required("timestamp", FieldKind::Timestamp),
            FieldSchema::required("value", FieldKind::Float),
            FieldSchema::optional("client_id", FieldKind::String),
            FieldSchema::optional("location_id", FieldKind::String),
            FieldSchema::optional("category", FieldKind::String),
        ]),
    )
    .expect("enriched schema registers");
}

fn base_architecture(names: &FlowNames, lifecycle: LifecycleStrategy, resources: CloudResourcesSpec) -> Architecture {
    let arch = Architecture {
        project_id: "e2e-project".into(),
        region: "europe-west1".into(),
        location: "US".into(),
        image_repo: "e2e-images".into(),
        service_manager_spec: DirectorSpec {
            name: format!("director-{}", names.dataflow),
            service_account: format!("director-sa-{}", names.dataflow),
            project_id: String::new(),
            deployment: DeploymentSpec::default(),
            command_topic: String::new(),
            completion_topic: String::new(),
            command_subscription: String::new(),
            completion_subscription: String::new(),
        },
        dataflows: BTreeMap::from([(
            names.dataflow.clone(),
            Dataflow {
                name: names.dataflow.clone(),
                lifecycle: LifecyclePolicy { strategy: lifecycle },
                services: BTreeMap::new(),
                resources,
            },
        )]),
    };
    hydrate(&arch, Some("e2e00001")).expect("fixture architecture hydrates")
}

/// Ingest -> warehouse: topic, subscription, dataset, clustered table.
pub fn warehouse_flow(names: &FlowNames, lifecycle: LifecycleStrategy) -> Architecture {
    register_schemas();
    base_architecture(
        names,
        lifecycle,
        CloudResourcesSpec {
            topics: vec![TopicConfig {
                name: names.ingest_topic.clone(),
            }],
            subscriptions: vec![SubscriptionConfig {
                name: names.ingest_subscription.clone(),
                topic: names.ingest_topic.clone(),
            }],
            bigquery_datasets: vec![DatasetConfig {
                name: names.dataset.clone(),
            }],
            bigquery_tables: vec![TableConfig {
                name: names.table.clone(),
                dataset: names.dataset.clone(),
                schema_type: ENRICHED_SCHEMA.into(),
                clustering_fields: vec!["device_id".into()],
            }],
            ..Default::default()
        },
    )
}

/// Ingest -> archive: topic, subscription, bucket.
pub fn archive_flow(names: &FlowNames, lifecycle: LifecycleStrategy) -> Architecture {
    register_schemas();
    base_architecture(
        names,
        lifecycle,
        CloudResourcesSpec {
            topics: vec![TopicConfig {
                name: names.ingest_topic.clone(),
            }],
            subscriptions: vec![SubscriptionConfig {
                name: names.ingest_subscription.clone(),
                topic: names.ingest_topic.clone(),
            }],
            gcs_buckets: vec![BucketConfig {
                name: names.bucket.clone(),
                location: "US".into(),
                storage_class: "STANDARD".into(),
            }],
            ..Default::default()
        },
    )
}

/// Ingest -> enrich -> warehouse: both topic pairs, the document collection
/// and far cache backing enrichment, and the warehouse pair.
pub fn enrichment_flow(names: &FlowNames, lifecycle: LifecycleStrategy) -> Architecture {
    register_schemas();
    base_architecture(
        names,
        lifecycle,
        CloudResourcesSpec {
            topics: vec![
                TopicConfig {
                    name: names.ingest_topic.clone(),
                },
                TopicConfig {
                    name: names.output_topic.clone(),
                },
            ],
            subscriptions: vec![
                SubscriptionConfig {
                    name: names.ingest_subscription.clone(),
                    topic: names.ingest_topic.clone(),
                },
                SubscriptionConfig {
                    name: names.output_subscription.clone(),
                    topic: names.output_topic.clone(),
                },
            ],
            bigquery_datasets: vec![DatasetConfig {
                name: names.dataset.clone(),
            }],
            bigquery_tables: vec![TableConfig {
                name: names.table.clone(),
                dataset: names.dataset.clone(),
                schema_type: ENRICHED_SCHEMA.into(),
                clustering_fields: vec!["device_id".into()],
            }],
            cache_instances: vec![CacheInstanceConfig {
                name: names.cache.clone(),
                memory_gb: 1,
            }],
            firestore_collections: vec![CollectionConfig {
                name: names.collection.clone(),
                database: "(default)".into(),
            }],
            ..Default::default()
        },
    )
}

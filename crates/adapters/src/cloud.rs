//! In-memory cloud backend and resource provisioners
//!
//! One coherent state tree stands in for the provider: resources created by
//! the provisioners gate the runtime adapters (a warehouse append against an
//! unprovisioned table fails, an object put against an unprovisioned bucket
//! fails). Every provisioner follows the uniform contract: ensure is
//! idempotent by name, an incompatible observed shape is a Conflict and is
//! never repaired, destroy tolerates absence.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use stratoflow_core::architecture::{
    BucketConfig, CacheInstanceConfig, CollectionConfig, DatasetConfig, SubscriptionConfig,
    TableConfig, TopicConfig,
};
use stratoflow_core::error::{DomainError, Result};
use stratoflow_core::provisioning::{DestroyOutcome, EnsureOutcome, Observation};
use stratoflow_core::schema_registry::{self, TableSchema};
use stratoflow_ports::provisioner::ResourceProvisioner;

use crate::pubsub::InMemoryPubSub;

pub(crate) struct BucketRecord {
    pub config: BucketConfig,
    pub objects: Mutex<BTreeMap<String, Vec<u8>>>,
}

pub(crate) struct TableRecord {
    pub config: TableConfig,
    pub schema: TableSchema,
    pub rows: Mutex<Vec<Value>>,
}

pub(crate) struct CacheRecord {
    pub config: CacheInstanceConfig,
    pub entries: DashMap<String, (Value, Instant)>,
}

pub(crate) struct CollectionRecord {
    pub config: CollectionConfig,
    pub documents: DashMap<String, Value>,
}

/// The simulated provider backing every port adapter of a run.
pub struct InMemoryCloud {
    pubsub: Arc<InMemoryPubSub>,
    pub(crate) buckets: DashMap<String, BucketRecord>,
    pub(crate) datasets: DashMap<String, DatasetConfig>,
    /// Keyed by `dataset.table`.
    pub(crate) tables: DashMap<String, TableRecord>,
    pub(crate) caches: DashMap<String, CacheRecord>,
    pub(crate) collections: DashMap<String, CollectionRecord>,
}

impl InMemoryCloud {
    pub fn new(pubsub: Arc<InMemoryPubSub>) -> Arc<Self> {
        Arc::new(Self {
            pubsub,
            buckets: DashMap::new(),
            datasets: DashMap::new(),
            tables: DashMap::new(),
            caches: DashMap::new(),
            collections: DashMap::new(),
        })
    }

    pub fn pubsub(&self) -> Arc<InMemoryPubSub> {
        Arc::clone(&self.pubsub)
    }

    pub fn table_key(dataset: &str, table: &str) -> String {
        format!("{dataset}.{table}")
    }

    /// Snapshot of a table's rows, for verification.
    pub fn table_rows(&self, dataset: &str, table: &str) -> Option<Vec<Value>> {
        self.tables
            .get(&Self::table_key(dataset, table))
            .map(|r| r.rows.lock().clone())
    }

    pub fn table_row_count(&self, dataset: &str, table: &str) -> usize {
        self.table_rows(dataset, table).map(|r| r.len()).unwrap_or(0)
    }
}

// ---- provisioner handles ----

macro_rules! cloud_handle {
    ($name:ident) => {
        pub struct $name {
            cloud: Arc<InMemoryCloud>,
        }

        impl $name {
            pub fn new(cloud: Arc<InMemoryCloud>) -> Self {
                Self { cloud }
            }
        }
    };
}

cloud_handle!(TopicProvisioner);
cloud_handle!(SubscriptionProvisioner);
cloud_handle!(BucketProvisioner);
cloud_handle!(DatasetProvisioner);
cloud_handle!(TableProvisioner);
cloud_handle!(CacheProvisioner);
cloud_handle!(CollectionProvisioner);

#[async_trait]
impl ResourceProvisioner for TopicProvisioner {
    type Spec = TopicConfig;

    async fn ensure(&self, desired: &TopicConfig) -> Result<EnsureOutcome> {
        if self.cloud.pubsub.create_topic(&desired.name) {
            Ok(EnsureOutcome::Created)
        } else {
            Ok(EnsureOutcome::Existed)
        }
    }

    async fn destroy(&self, name: &str) -> Result<DestroyOutcome> {
        if self.cloud.pubsub.delete_topic(name) {
            Ok(DestroyOutcome::Destroyed)
        } else {
            Ok(DestroyOutcome::Absent)
        }
    }

    async fn observe(&self, name: &str) -> Result<Observation> {
        Ok(if self.cloud.pubsub.topic_exists(name) {
            Observation::Exists
        } else {
            Observation::Absent
        })
    }
}

#[async_trait]
impl ResourceProvisioner for SubscriptionProvisioner {
    type Spec = SubscriptionConfig;

    async fn ensure(&self, desired: &SubscriptionConfig) -> Result<EnsureOutcome> {
        if self
            .cloud
            .pubsub
            .create_subscription(&desired.name, &desired.topic)?
        {
            Ok(EnsureOutcome::Created)
        } else {
            Ok(EnsureOutcome::Existed)
        }
    }

    async fn destroy(&self, name: &str) -> Result<DestroyOutcome> {
        if self.cloud.pubsub.delete_subscription(name) {
            Ok(DestroyOutcome::Destroyed)
        } else {
            Ok(DestroyOutcome::Absent)
        }
    }

    async fn observe(&self, name: &str) -> Result<Observation> {
        Ok(if self.cloud.pubsub.subscription_topic(name).is_some() {
            Observation::Exists
        } else {
            Observation::Absent
        })
    }
}

#[async_trait]
impl ResourceProvisioner for BucketProvisioner {
    type Spec = BucketConfig;

    async fn ensure(&self, desired: &BucketConfig) -> Result<EnsureOutcome> {
        if let Some(existing) = self.cloud.buckets.get(&desired.name) {
            if existing.config == *desired {
                return Ok(EnsureOutcome::Existed);
            }
            return Err(DomainError::Conflict(format!(
                "bucket {} exists with location {} / class {}",
                desired.name, existing.config.location, existing.config.storage_class
            )));
        }
        self.cloud.buckets.insert(
            desired.name.clone(),
            BucketRecord {
                config: desired.clone(),
                objects: Mutex::new(BTreeMap::new()),
            },
        );
        Ok(EnsureOutcome::Created)
    }

    async fn destroy(&self, name: &str) -> Result<DestroyOutcome> {
        Ok(match self.cloud.buckets.remove(name) {
            Some(_) => DestroyOutcome::Destroyed,
            None => DestroyOutcome::Absent,
        })
    }

    async fn observe(&self, name: &str) -> Result<Observation> {
        Ok(if self.cloud.buckets.contains_key(name) {
            Observation::Exists
        } else {
            Observation::Absent
        })
    }
}

#[async_trait]
impl ResourceProvisioner for DatasetProvisioner {
    type Spec = DatasetConfig;

    async fn ensure(&self, desired: &DatasetConfig) -> Result<EnsureOutcome> {
        let mut created = false;
        self.cloud
            .datasets
            .entry(desired.name.clone())
            .or_insert_with(|| {
                created = true;
                desired.clone()
            });
        Ok(if created {
            EnsureOutcome::Created
        } else {
            EnsureOutcome::Existed
        })
    }

    async fn destroy(&self, name: &str) -> Result<DestroyOutcome> {
        Ok(match self.cloud.datasets.remove(name) {
            Some(_) => DestroyOutcome::Destroyed,
            None => DestroyOutcome::Absent,
        })
    }

    async fn observe(&self, name: &str) -> Result<Observation> {
        Ok(if self.cloud.datasets.contains_key(name) {
            Observation::Exists
        } else {
            Observation::Absent
        })
    }
}

#[async_trait]
impl ResourceProvisioner for TableProvisioner {
    type Spec = TableConfig;

    async fn ensure(&self, desired: &TableConfig) -> Result<EnsureOutcome> {
        if !self.cloud.datasets.contains_key(&desired.dataset) {
            return Err(DomainError::Precondition(format!(
                "table {} requires dataset {}",
                desired.name, desired.dataset
            )));
        }
        let key = InMemoryCloud::table_key(&desired.dataset, &desired.name);
        if let Some(existing) = self.cloud.tables.get(&key) {
            if existing.config == *desired {
                return Ok(EnsureOutcome::Existed);
            }
            // A table's schema is never silently altered.
            return Err(DomainError::Conflict(format!(
                "table {key} exists with schema {} / clustering {:?}",
                existing.config.schema_type, existing.config.clustering_fields
            )));
        }
        let schema = schema_registry::lookup_schema(&desired.schema_type).ok_or_else(|| {
            DomainError::Precondition(format!(
                "schema identifier {} is not registered",
                desired.schema_type
            ))
        })?;
        self.cloud.tables.insert(
            key,
            TableRecord {
                config: desired.clone(),
                schema,
                rows: Mutex::new(Vec::new()),
            },
        );
        Ok(EnsureOutcome::Created)
    }

    /// `name` is the composite `dataset.table` key.
    async fn destroy(&self, name: &str) -> Result<DestroyOutcome> {
        Ok(match self.cloud.tables.remove(name) {
            Some(_) => DestroyOutcome::Destroyed,
            None => DestroyOutcome::Absent,
        })
    }

    async fn observe(&self, name: &str) -> Result<Observation> {
        Ok(if self.cloud.tables.contains_key(name) {
            Observation::Exists
        } else {
            Observation::Absent
        })
    }
}

#[async_trait]
impl ResourceProvisioner for CacheProvisioner {
    type Spec = CacheInstanceConfig;

    async fn ensure(&self, desired: &CacheInstanceConfig) -> Result<EnsureOutcome> {
        if let Some(mut existing) = self.cloud.caches.get_mut(&desired.name) {
            if existing.config == *desired {
                return Ok(EnsureOutcome::Existed);
            }
            // Resizing a cache is an in-place update, not a conflict.
            existing.config = desired.clone();
            return Ok(EnsureOutcome::Updated);
        }
        self.cloud.caches.insert(
            desired.name.clone(),
            CacheRecord {
                config: desired.clone(),
                entries: DashMap::new(),
            },
        );
        Ok(EnsureOutcome::Created)
    }

    async fn destroy(&self, name: &str) -> Result<DestroyOutcome> {
        Ok(match self.cloud.caches.remove(name) {
            Some(_) => DestroyOutcome::Destroyed,
            None => DestroyOutcome::Absent,
        })
    }

    async fn observe(&self, name: &str) -> Result<Observation> {
        Ok(if self.cloud.caches.contains_key(name) {
            Observation::Exists
        } else {
            Observation::Absent
        })
    }
}

#[async_trait]
impl ResourceProvisioner for CollectionProvisioner {
    type Spec = CollectionConfig;

    async fn ensure(&self, desired: &CollectionConfig) -> Result<EnsureOutcome> {
        if let Some(existing) = self.cloud.collections.get(&desired.name) {
            if existing.config == *desired {
                return Ok(EnsureOutcome::Existed);
            }
            return Err(DomainError::Conflict(format!(
                "collection {} exists in database {}",
                desired.name, existing.config.database
            )));
        }
        self.cloud.collections.insert(
            desired.name.clone(),
            CollectionRecord {
                config: desired.clone(),
                documents: DashMap::new(),
            },
        );
        Ok(EnsureOutcome::Created)
    }

    async fn destroy(&self, name: &str) -> Result<DestroyOutcome> {
        Ok(match self.cloud.collections.remove(name) {
            Some(_) => DestroyOutcome::Destroyed,
            None => DestroyOutcome::Absent,
        })
    }

    async fn observe(&self, name: &str) -> Result<Observation> {
        Ok(if self.cloud.collections.contains_key(name) {
            Observation::Exists
        } else {
            Observation::Absent
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratoflow_core::schema_registry::{FieldKind, FieldSchema};

    fn cloud() -> Arc<InMemoryCloud> {
        InMemoryCloud::new(Arc::new(InMemoryPubSub::new()))
    }

    #[tokio::test]
    async fn topic_ensure_is_idempotent() {
        let cloud = cloud();
        let topics = TopicProvisioner::new(Arc::clone(&cloud));
        let spec = TopicConfig {
            name: "readings".into(),
        };
        assert_eq!(topics.ensure(&spec).await.unwrap(), EnsureOutcome::Created);
        assert_eq!(topics.ensure(&spec).await.unwrap(), EnsureOutcome::Existed);
        assert_eq!(topics.observe("readings").await.unwrap(), Observation::Exists);
        assert_eq!(
            topics.destroy("readings").await.unwrap(),
            DestroyOutcome::Destroyed
        );
        assert_eq!(
            topics.destroy("readings").await.unwrap(),
            DestroyOutcome::Absent
        );
    }

    #[tokio::test]
    async fn table_requires_dataset_and_registered_schema() {
        let cloud = cloud();
        let datasets = DatasetProvisioner::new(Arc::clone(&cloud));
        let tables = TableProvisioner::new(Arc::clone(&cloud));

        let table = TableConfig {
            name: "readings".into(),
            dataset: "telemetry".into(),
            schema_type: "cloud.test.Reading".into(),
            clustering_fields: vec!["device_id".into()],
        };
        assert!(matches!(
            tables.ensure(&table).await.unwrap_err(),
            DomainError::Precondition(_)
        ));

        datasets
            .ensure(&DatasetConfig {
                name: "telemetry".into(),
            })
            .await
            .unwrap();
        schema_registry::register_schema(
            "cloud.test.Reading",
            TableSchema::new(vec![FieldSchema::required("device_id", FieldKind::String)]),
        )
        .unwrap();

        assert_eq!(tables.ensure(&table).await.unwrap(), EnsureOutcome::Created);
        assert_eq!(tables.ensure(&table).await.unwrap(), EnsureOutcome::Existed);
    }

    #[tokio::test]
    async fn incompatible_table_shape_is_a_conflict() {
        let cloud = cloud();
        let datasets = DatasetProvisioner::new(Arc::clone(&cloud));
        let tables = TableProvisioner::new(Arc::clone(&cloud));
        datasets
            .ensure(&DatasetConfig {
                name: "telemetry".into(),
            })
            .await
            .unwrap();
        schema_registry::register_schema("cloud.test.ShapeA", TableSchema::new(vec![])).unwrap();
        schema_registry::register_schema("cloud.test.ShapeB", TableSchema::new(vec![])).unwrap();

        let mut table = TableConfig {
            name: "rows".into(),
            dataset: "telemetry".into(),
            schema_type: "cloud.test.ShapeA".into(),
            clustering_fields: vec![],
        };
        tables.ensure(&table).await.unwrap();

        table.schema_type = "cloud.test.ShapeB".into();
        let err = tables.ensure(&table).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        // The stored shape is untouched.
        let record = cloud.tables.get("telemetry.rows").unwrap();
        assert_eq!(record.config.schema_type, "cloud.test.ShapeA");
    }

    #[tokio::test]
    async fn cache_resize_is_an_update() {
        let cloud = cloud();
        let caches = CacheProvisioner::new(Arc::clone(&cloud));
        let mut spec = CacheInstanceConfig {
            name: "device-cache".into(),
            memory_gb: 1,
        };
        assert_eq!(caches.ensure(&spec).await.unwrap(), EnsureOutcome::Created);
        spec.memory_gb = 4;
        assert_eq!(caches.ensure(&spec).await.unwrap(), EnsureOutcome::Updated);
        assert_eq!(caches.ensure(&spec).await.unwrap(), EnsureOutcome::Existed);
    }
}

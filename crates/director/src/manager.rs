//! Service manager: drives the per-kind provisioners over a dataflow
//!
//! Setup walks the resource spec in dependency order (topics before
//! subscriptions, datasets before tables); teardown walks the reverse.
//! Every pass reports per-item outcomes; one failed item does not abort the
//! remainder, dependents of a failed precondition fail on their own ensure.

use std::sync::Arc;

use tracing::info;

use stratoflow_core::architecture::{
    BucketConfig, CacheInstanceConfig, CollectionConfig, Dataflow, DatasetConfig, DirectorSpec,
    LifecycleStrategy, SubscriptionConfig, TableConfig, TopicConfig,
};
use stratoflow_core::error::Result;
use stratoflow_core::provisioning::{ItemOutcome, ProvisionReport, ResourceKind};
use stratoflow_ports::provisioner::ResourceProvisioner;

use stratoflow_adapters::cloud::{
    BucketProvisioner, CacheProvisioner, CollectionProvisioner, DatasetProvisioner, InMemoryCloud,
    SubscriptionProvisioner, TableProvisioner, TopicProvisioner,
};

pub struct ServiceManager {
    topics: Arc<dyn ResourceProvisioner<Spec = TopicConfig>>,
    subscriptions: Arc<dyn ResourceProvisioner<Spec = SubscriptionConfig>>,
    buckets: Arc<dyn ResourceProvisioner<Spec = BucketConfig>>,
    datasets: Arc<dyn ResourceProvisioner<Spec = DatasetConfig>>,
    tables: Arc<dyn ResourceProvisioner<Spec = TableConfig>>,
    caches: Arc<dyn ResourceProvisioner<Spec = CacheInstanceConfig>>,
    collections: Arc<dyn ResourceProvisioner<Spec = CollectionConfig>>,
}

impl ServiceManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topics: Arc<dyn ResourceProvisioner<Spec = TopicConfig>>,
        subscriptions: Arc<dyn ResourceProvisioner<Spec = SubscriptionConfig>>,
        buckets: Arc<dyn ResourceProvisioner<Spec = BucketConfig>>,
        datasets: Arc<dyn ResourceProvisioner<Spec = DatasetConfig>>,
        tables: Arc<dyn ResourceProvisioner<Spec = TableConfig>>,
        caches: Arc<dyn ResourceProvisioner<Spec = CacheInstanceConfig>>,
        collections: Arc<dyn ResourceProvisioner<Spec = CollectionConfig>>,
    ) -> Self {
        Self {
            topics,
            subscriptions,
            buckets,
            datasets,
            tables,
            caches,
            collections,
        }
    }

    /// Wire every provisioner to the in-memory backend.
    pub fn in_memory(cloud: &Arc<InMemoryCloud>) -> Self {
        Self::new(
            Arc::new(TopicProvisioner::new(Arc::clone(cloud))),
            Arc::new(SubscriptionProvisioner::new(Arc::clone(cloud))),
            Arc::new(BucketProvisioner::new(Arc::clone(cloud))),
            Arc::new(DatasetProvisioner::new(Arc::clone(cloud))),
            Arc::new(TableProvisioner::new(Arc::clone(cloud))),
            Arc::new(CacheProvisioner::new(Arc::clone(cloud))),
            Arc::new(CollectionProvisioner::new(Arc::clone(cloud))),
        )
    }

    /// Bring every resource of a dataflow to its desired state.
    pub async fn setup_dataflow(&self, flow: &Dataflow) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::new(&flow.name);
        let resources = &flow.resources;

        for spec in &resources.topics {
            ensure_into(&mut report, &*self.topics, ResourceKind::Topic, &spec.name, spec).await;
        }
        for spec in &resources.subscriptions {
            ensure_into(
                &mut report,
                &*self.subscriptions,
                ResourceKind::Subscription,
                &spec.name,
                spec,
            )
            .await;
        }
        for spec in &resources.bigquery_datasets {
            ensure_into(&mut report, &*self.datasets, ResourceKind::Dataset, &spec.name, spec)
                .await;
        }
        for spec in &resources.bigquery_tables {
            let name = InMemoryCloud::table_key(&spec.dataset, &spec.name);
            ensure_into(&mut report, &*self.tables, ResourceKind::Table, &name, spec).await;
        }
        for spec in &resources.gcs_buckets {
            ensure_into(&mut report, &*self.buckets, ResourceKind::Bucket, &spec.name, spec).await;
        }
        for spec in &resources.cache_instances {
            ensure_into(&mut report, &*self.caches, ResourceKind::Cache, &spec.name, spec).await;
        }
        for spec in &resources.firestore_collections {
            ensure_into(
                &mut report,
                &*self.collections,
                ResourceKind::Collection,
                &spec.name,
                spec,
            )
            .await;
        }

        info!(
            dataflow = %flow.name,
            items = report.items.len(),
            created = report.created_count(),
            "dataflow setup pass complete"
        );
        Ok(report)
    }

    /// Destroy a dataflow's resources in reverse dependency order,
    /// honoring the lifecycle policy.
    pub async fn teardown_dataflow(&self, flow: &Dataflow) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::new(&flow.name);
        let resources = &flow.resources;

        if flow.lifecycle.strategy == LifecycleStrategy::Permanent {
            // Permanent dataflows are left intact; report every resource.
            for spec in &resources.firestore_collections {
                report.push(ResourceKind::Collection, &spec.name, ItemOutcome::SkippedPermanent);
            }
            for spec in &resources.cache_instances {
                report.push(ResourceKind::Cache, &spec.name, ItemOutcome::SkippedPermanent);
            }
            for spec in &resources.gcs_buckets {
                report.push(ResourceKind::Bucket, &spec.name, ItemOutcome::SkippedPermanent);
            }
            for spec in &resources.bigquery_tables {
                let name = InMemoryCloud::table_key(&spec.dataset, &spec.name);
                report.push(ResourceKind::Table, name, ItemOutcome::SkippedPermanent);
            }
            for spec in &resources.bigquery_datasets {
                report.push(ResourceKind::Dataset, &spec.name, ItemOutcome::SkippedPermanent);
            }
            for spec in &resources.subscriptions {
                report.push(ResourceKind::Subscription, &spec.name, ItemOutcome::SkippedPermanent);
            }
            for spec in &resources.topics {
                report.push(ResourceKind::Topic, &spec.name, ItemOutcome::SkippedPermanent);
            }
            info!(dataflow = %flow.name, "permanent lifecycle, teardown skipped");
            return Ok(report);
        }

        for spec in &resources.firestore_collections {
            destroy_into(&mut report, &*self.collections, ResourceKind::Collection, &spec.name)
                .await;
        }
        for spec in &resources.cache_instances {
            destroy_into(&mut report, &*self.caches, ResourceKind::Cache, &spec.name).await;
        }
        for spec in &resources.gcs_buckets {
            destroy_into(&mut report, &*self.buckets, ResourceKind::Bucket, &spec.name).await;
        }
        for spec in &resources.bigquery_tables {
            let name = InMemoryCloud::table_key(&spec.dataset, &spec.name);
            destroy_into(&mut report, &*self.tables, ResourceKind::Table, &name).await;
        }
        for spec in &resources.bigquery_datasets {
            destroy_into(&mut report, &*self.datasets, ResourceKind::Dataset, &spec.name).await;
        }
        for spec in &resources.subscriptions {
            destroy_into(&mut report, &*self.subscriptions, ResourceKind::Subscription, &spec.name)
                .await;
        }
        for spec in &resources.topics {
            destroy_into(&mut report, &*self.topics, ResourceKind::Topic, &spec.name).await;
        }

        info!(
            dataflow = %flow.name,
            items = report.items.len(),
            "dataflow teardown pass complete"
        );
        Ok(report)
    }

    /// Ensure the Director's own command/completion channel pair.
    pub async fn ensure_command_channels(&self, director: &DirectorSpec) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::new("command-channels");
        for topic in [&director.command_topic, &director.completion_topic] {
            let spec = TopicConfig {
                name: topic.clone(),
            };
            ensure_into(&mut report, &*self.topics, ResourceKind::Topic, topic, &spec).await;
        }
        for (sub, topic) in [
            (&director.command_subscription, &director.command_topic),
            (&director.completion_subscription, &director.completion_topic),
        ] {
            let spec = SubscriptionConfig {
                name: sub.clone(),
                topic: topic.clone(),
            };
            ensure_into(&mut report, &*self.subscriptions, ResourceKind::Subscription, sub, &spec)
                .await;
        }
        Ok(report)
    }
}

async fn ensure_into<S: Send + Sync>(
    report: &mut ProvisionReport,
    provisioner: &dyn ResourceProvisioner<Spec = S>,
    kind: ResourceKind,
    name: &str,
    spec: &S,
) {
    match provisioner.ensure(spec).await {
        Ok(outcome) => report.push(kind, name, ItemOutcome::Ensured(outcome)),
        Err(e) => report.push(kind, name, ItemOutcome::Failed(e.to_string())),
    }
}

async fn destroy_into<S: Send + Sync>(
    report: &mut ProvisionReport,
    provisioner: &dyn ResourceProvisioner<Spec = S>,
    kind: ResourceKind,
    name: &str,
) {
    match provisioner.destroy(name).await {
        Ok(outcome) => report.push(kind, name, ItemOutcome::Destroyed(outcome)),
        Err(e) => report.push(kind, name, ItemOutcome::Failed(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use stratoflow_adapters::InMemoryPubSub;
    use stratoflow_core::architecture::{CloudResourcesSpec, LifecyclePolicy};
    use stratoflow_core::provisioning::{DestroyOutcome, EnsureOutcome};
    use stratoflow_core::schema_registry::{self, TableSchema};

    fn flow(strategy: LifecycleStrategy) -> Dataflow {
        schema_registry::register_schema("manager.test.Row", TableSchema::new(vec![])).unwrap();
        Dataflow {
            name: "flow".into(),
            lifecycle: LifecyclePolicy { strategy },
            services: BTreeMap::new(),
            resources: CloudResourcesSpec {
                topics: vec![TopicConfig {
                    name: "readings".into(),
                }],
                subscriptions: vec![SubscriptionConfig {
                    name: "readings-sub".into(),
                    topic: "readings".into(),
                }],
                bigquery_datasets: vec![DatasetConfig {
                    name: "telemetry".into(),
                }],
                bigquery_tables: vec![TableConfig {
                    name: "rows".into(),
                    dataset: "telemetry".into(),
                    schema_type: "manager.test.Row".into(),
                    clustering_fields: vec![],
                }],
                ..Default::default()
            },
        }
    }

    fn manager() -> (Arc<InMemoryCloud>, ServiceManager) {
        let cloud = InMemoryCloud::new(Arc::new(InMemoryPubSub::new()));
        let manager = ServiceManager::in_memory(&cloud);
        (cloud, manager)
    }

    #[tokio::test]
    async fn setup_twice_is_idempotent() {
        let (_, manager) = manager();
        let flow = flow(LifecycleStrategy::Ephemeral);

        let first = manager.setup_dataflow(&flow).await.unwrap();
        assert!(first.first_failure().is_none());
        assert_eq!(first.created_count(), 4);

        let second = manager.setup_dataflow(&flow).await.unwrap();
        assert!(second.first_failure().is_none());
        // The second pass performs no mutation.
        assert_eq!(second.created_count(), 0);
        assert!(second
            .items
            .iter()
            .all(|i| i.outcome == ItemOutcome::Ensured(EnsureOutcome::Existed)));
    }

    #[tokio::test]
    async fn teardown_respects_permanent_lifecycle() {
        let (cloud, manager) = manager();
        let flow = flow(LifecycleStrategy::Permanent);
        manager.setup_dataflow(&flow).await.unwrap();

        let report = manager.teardown_dataflow(&flow).await.unwrap();
        assert!(report
            .items
            .iter()
            .all(|i| i.outcome == ItemOutcome::SkippedPermanent));
        // Everything is still there.
        assert!(cloud.pubsub().topic_exists("readings"));
        assert!(cloud.table_rows("telemetry", "rows").is_some());
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_tolerates_absence() {
        let (_, manager) = manager();
        let flow = flow(LifecycleStrategy::Ephemeral);
        manager.setup_dataflow(&flow).await.unwrap();

        let first = manager.teardown_dataflow(&flow).await.unwrap();
        assert!(first
            .items
            .iter()
            .all(|i| i.outcome == ItemOutcome::Destroyed(DestroyOutcome::Destroyed)));

        let second = manager.teardown_dataflow(&flow).await.unwrap();
        assert!(second
            .items
            .iter()
            .all(|i| i.outcome == ItemOutcome::Destroyed(DestroyOutcome::Absent)));
    }

    #[tokio::test]
    async fn subscription_failure_is_reported_per_item() {
        let (_, manager) = manager();
        let mut flow = flow(LifecycleStrategy::Ephemeral);
        // A subscription whose topic is not in the resource set fails on
        // its own; the rest of the pass still runs.
        flow.resources.subscriptions.push(SubscriptionConfig {
            name: "dangling-sub".into(),
            topic: "nowhere".into(),
        });

        let report = manager.setup_dataflow(&flow).await.unwrap();
        let failure = report.first_failure().unwrap();
        assert_eq!(failure.name, "dangling-sub");
        // Later kinds were still provisioned.
        assert!(report
            .items
            .iter()
            .any(|i| i.kind == ResourceKind::Table && !i.outcome.is_failure()));
    }
}

//! Declarative architecture model
//!
//! The architecture graph describes everything a deployment run needs:
//! environment, the Director spec, and per-dataflow services and cloud
//! resources. Documents are written in YAML (see the project fixtures) and
//! completed by [`crate::hydration::hydrate`] before anything consumes them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root of the architecture graph.
///
/// `project_id` is singular: once set it propagates to every child spec and
/// must never be contradicted by a nested value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Architecture {
    pub project_id: String,
    pub region: String,
    #[serde(default = "default_location")]
    pub location: String,
    pub image_repo: String,
    pub service_manager_spec: DirectorSpec,
    #[serde(default)]
    pub dataflows: BTreeMap<String, Dataflow>,
}

fn default_location() -> String {
    "US".to_string()
}

impl Architecture {
    /// Every application service in the architecture, with its dataflow name.
    pub fn all_services(&self) -> impl Iterator<Item = (&str, &ServiceSpec)> {
        self.dataflows
            .iter()
            .flat_map(|(df, flow)| flow.services.values().map(move |svc| (df.as_str(), svc)))
    }
}

/// Specification of the privileged Director service.
///
/// The command/completion channel names are derived during hydration when
/// absent; they are plain topics and subscriptions like any other.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectorSpec {
    pub name: String,
    pub service_account: String,
    #[serde(default)]
    pub project_id: String,
    pub deployment: DeploymentSpec,
    #[serde(default)]
    pub command_topic: String,
    #[serde(default)]
    pub completion_topic: String,
    #[serde(default)]
    pub command_subscription: String,
    #[serde(default)]
    pub completion_subscription: String,
}

/// One dataflow: the unit of isolation within an architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataflow {
    pub name: String,
    #[serde(default)]
    pub lifecycle: LifecyclePolicy,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSpec>,
    #[serde(default)]
    pub resources: CloudResourcesSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecyclePolicy {
    #[serde(default)]
    pub strategy: LifecycleStrategy,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStrategy {
    /// Resources are destroyed on teardown.
    #[default]
    Ephemeral,
    /// Teardown leaves every resource intact.
    Permanent,
}

/// One deployable application service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    pub service_account: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub deployment: DeploymentSpec,
    /// Declared resource usage: the source of both the per-service
    /// `resources.yaml` projection and the IAM capability plan.
    #[serde(default)]
    pub resources: ServiceResourceUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub source_path: String,
    #[serde(default)]
    pub buildable_module_path: String,
    /// Immutable image URI. Derived at hydration when unset.
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub environment_vars: BTreeMap<String, String>,
    /// Env var name -> secret name; resolved by the deploy target.
    #[serde(default)]
    pub secret_environment_vars: BTreeMap<String, String>,
    #[serde(default = "default_cpu")]
    pub cpu: String,
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default)]
    pub min_instances: u32,
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
}

fn default_cpu() -> String {
    "1".to_string()
}

fn default_memory() -> String {
    "512Mi".to_string()
}

fn default_max_instances() -> u32 {
    3
}

/// The resource names a single service references, by role.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceResourceUsage {
    #[serde(default)]
    pub publishes_topics: Vec<String>,
    #[serde(default)]
    pub consumes_subscriptions: Vec<String>,
    #[serde(default)]
    pub writes_tables: Vec<TableRef>,
    #[serde(default)]
    pub writes_buckets: Vec<String>,
    #[serde(default)]
    pub reads_collections: Vec<String>,
    #[serde(default)]
    pub uses_caches: Vec<String>,
}

impl ServiceResourceUsage {
    pub fn is_empty(&self) -> bool {
        self.publishes_topics.is_empty()
            && self.consumes_subscriptions.is_empty()
            && self.writes_tables.is_empty()
            && self.writes_buckets.is_empty()
            && self.reads_collections.is_empty()
            && self.uses_caches.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableRef {
    pub dataset: String,
    pub table: String,
}

/// The minimal projection embedded into each service image as
/// `resources.yaml`. Written by the Conductor before build, read at service
/// startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceManifest {
    pub service: String,
    pub dataflow: String,
    pub project_id: String,
    #[serde(flatten)]
    pub resources: ServiceResourceUsage,
}

/// All cloud resources owned by one dataflow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CloudResourcesSpec {
    #[serde(default)]
    pub topics: Vec<TopicConfig>,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
    #[serde(default)]
    pub gcs_buckets: Vec<BucketConfig>,
    #[serde(default)]
    pub bigquery_datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub bigquery_tables: Vec<TableConfig>,
    #[serde(default)]
    pub cache_instances: Vec<CacheInstanceConfig>,
    #[serde(default)]
    pub firestore_collections: Vec<CollectionConfig>,
}

impl CloudResourcesSpec {
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
            && self.subscriptions.is_empty()
            && self.gcs_buckets.is_empty()
            && self.bigquery_datasets.is_empty()
            && self.bigquery_tables.is_empty()
            && self.cache_instances.is_empty()
            && self.firestore_collections.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Defaults to `<topic>-sub` during hydration.
    #[serde(default)]
    pub name: String,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    pub name: String,
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
}

fn default_storage_class() -> String {
    "STANDARD".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub dataset: String,
    /// Identifier resolved through the schema registry.
    pub schema_type: String,
    #[serde(default)]
    pub clustering_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheInstanceConfig {
    pub name: String,
    #[serde(default = "default_cache_memory_gb")]
    pub memory_gb: u32,
}

fn default_cache_memory_gb() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    pub name: String,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    "(default)".to_string()
}

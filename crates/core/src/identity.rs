//! Identity planning
//!
//! Computes the minimum capability set per principal from each service's
//! declared resource usage. The emitted plan is serializable so it can be
//! reviewed before the applier performs any grant.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::architecture::Architecture;

/// A reference to a grantable resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRef {
    Topic(String),
    Subscription(String),
    Dataset(String),
    Table { dataset: String, table: String },
    Bucket(String),
    Collection(String),
    Cache(String),
    Secret(String),
    /// The whole resource group of a dataflow (Director admin scope).
    Dataflow(String),
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic(n) => write!(f, "topic/{n}"),
            Self::Subscription(n) => write!(f, "subscription/{n}"),
            Self::Dataset(n) => write!(f, "dataset/{n}"),
            Self::Table { dataset, table } => write!(f, "table/{dataset}.{table}"),
            Self::Bucket(n) => write!(f, "bucket/{n}"),
            Self::Collection(n) => write!(f, "collection/{n}"),
            Self::Cache(n) => write!(f, "cache/{n}"),
            Self::Secret(n) => write!(f, "secret/{n}"),
            Self::Dataflow(n) => write!(f, "dataflow/{n}"),
        }
    }
}

/// The operation a capability authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Publisher,
    Subscriber,
    TopicViewer,
    WarehouseAppender,
    DatasetViewer,
    ObjectCreator,
    DocumentViewer,
    CacheUser,
    SecretAccessor,
    Admin,
}

/// A (principal, resource, role) tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityBinding {
    pub principal: String,
    pub resource: ResourceRef,
    pub role: Role,
}

impl std::fmt::Display for CapabilityBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {:?} on {}", self.principal, self.role, self.resource)
    }
}

/// The reviewable output of the planner: deduplicated, deterministically
/// ordered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IamPlan {
    pub bindings: BTreeSet<CapabilityBinding>,
}

impl IamPlan {
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn for_principal<'a>(
        &'a self,
        principal: &'a str,
    ) -> impl Iterator<Item = &'a CapabilityBinding> {
        self.bindings
            .iter()
            .filter(move |b| b.principal == principal)
    }

    fn grant(&mut self, principal: &str, resource: ResourceRef, role: Role) {
        self.bindings.insert(CapabilityBinding {
            principal: principal.to_string(),
            resource,
            role,
        });
    }
}

/// Compute the minimum capability set for every principal in the hydrated
/// architecture, the Director included.
pub fn plan_for_architecture(arch: &Architecture) -> IamPlan {
    let mut plan = IamPlan::default();

    // Subscription name -> backing topic, across the whole architecture plus
    // the Director's command channels.
    let mut sub_topics: BTreeMap<&str, &str> = BTreeMap::new();
    for flow in arch.dataflows.values() {
        for sub in &flow.resources.subscriptions {
            sub_topics.insert(&sub.name, &sub.topic);
        }
    }
    let director = &arch.service_manager_spec;
    sub_topics.insert(&director.command_subscription, &director.command_topic);
    sub_topics.insert(&director.completion_subscription, &director.completion_topic);

    for (_, svc) in arch.all_services() {
        let principal = svc.service_account.as_str();
        let usage = &svc.resources;

        for topic in &usage.publishes_topics {
            plan.grant(principal, ResourceRef::Topic(topic.clone()), Role::Publisher);
        }
        for sub in &usage.consumes_subscriptions {
            plan.grant(
                principal,
                ResourceRef::Subscription(sub.clone()),
                Role::Subscriber,
            );
            if let Some(topic) = sub_topics.get(sub.as_str()) {
                plan.grant(
                    principal,
                    ResourceRef::Topic(topic.to_string()),
                    Role::TopicViewer,
                );
            }
        }
        for table in &usage.writes_tables {
            plan.grant(
                principal,
                ResourceRef::Table {
                    dataset: table.dataset.clone(),
                    table: table.table.clone(),
                },
                Role::WarehouseAppender,
            );
            plan.grant(
                principal,
                ResourceRef::Dataset(table.dataset.clone()),
                Role::DatasetViewer,
            );
        }
        for bucket in &usage.writes_buckets {
            plan.grant(
                principal,
                ResourceRef::Bucket(bucket.clone()),
                Role::ObjectCreator,
            );
        }
        for collection in &usage.reads_collections {
            plan.grant(
                principal,
                ResourceRef::Collection(collection.clone()),
                Role::DocumentViewer,
            );
        }
        for cache in &usage.uses_caches {
            plan.grant(principal, ResourceRef::Cache(cache.clone()), Role::CacheUser);
        }
        for secret in svc.deployment.secret_environment_vars.values() {
            plan.grant(
                principal,
                ResourceRef::Secret(secret.clone()),
                Role::SecretAccessor,
            );
        }
    }

    // The Director administers every dataflow's resources, publishes
    // completions and consumes commands.
    let director_sa = director.service_account.as_str();
    for name in arch.dataflows.keys() {
        plan.grant(director_sa, ResourceRef::Dataflow(name.clone()), Role::Admin);
    }
    plan.grant(
        director_sa,
        ResourceRef::Topic(director.completion_topic.clone()),
        Role::Publisher,
    );
    plan.grant(
        director_sa,
        ResourceRef::Subscription(director.command_subscription.clone()),
        Role::Subscriber,
    );
    for secret in director.deployment.secret_environment_vars.values() {
        plan.grant(
            director_sa,
            ResourceRef::Secret(secret.clone()),
            Role::SecretAccessor,
        );
    }

    plan
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::architecture::*;
    use crate::hydration::hydrate;

    fn arch_with_usage() -> Architecture {
        let mut services = BTreeMap::new();
        services.insert(
            "sink".to_string(),
            ServiceSpec {
                name: "sink".into(),
                service_account: "sink-sa".into(),
                project_id: String::new(),
                dependencies: vec![],
                deployment: DeploymentSpec {
                    secret_environment_vars: BTreeMap::from([(
                        "API_KEY".to_string(),
                        "sink-api-key".to_string(),
                    )]),
                    ..Default::default()
                },
                resources: ServiceResourceUsage {
                    consumes_subscriptions: vec!["readings-sub".into()],
                    writes_tables: vec![TableRef {
                        dataset: "telemetry".into(),
                        table: "readings".into(),
                    }],
                    ..Default::default()
                },
            },
        );

        crate::schema_registry::register_schema(
            "stratoflow.test.Reading",
            crate::schema_registry::TableSchema::new(vec![]),
        )
        .unwrap();

        let flow = Dataflow {
            name: "flow".into(),
            lifecycle: LifecyclePolicy::default(),
            services,
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
                    name: "readings".into(),
                    dataset: "telemetry".into(),
                    schema_type: "stratoflow.test.Reading".into(),
                    clustering_fields: vec![],
                }],
                ..Default::default()
            },
        };

        Architecture {
            project_id: "demo".into(),
            region: "europe-west1".into(),
            location: "US".into(),
            image_repo: "imgs".into(),
            service_manager_spec: DirectorSpec {
                name: "director".into(),
                service_account: "director-sa".into(),
                project_id: String::new(),
                deployment: DeploymentSpec::default(),
                command_topic: String::new(),
                completion_topic: String::new(),
                command_subscription: String::new(),
                completion_subscription: String::new(),
            },
            dataflows: BTreeMap::from([("flow".to_string(), flow)]),
        }
    }

    #[test]
    fn consumer_gets_subscription_and_topic_read() {
        let arch = hydrate(&arch_with_usage(), Some("t0")).unwrap();
        let plan = plan_for_architecture(&arch);

        let sink: Vec<_> = plan.for_principal("sink-sa").collect();
        assert!(sink.iter().any(|b| b.role == Role::Subscriber
            && b.resource == ResourceRef::Subscription("readings-sub".into())));
        assert!(sink.iter().any(|b| b.role == Role::TopicViewer
            && b.resource == ResourceRef::Topic("readings".into())));
        assert!(sink.iter().any(|b| b.role == Role::WarehouseAppender));
        assert!(sink.iter().any(|b| b.role == Role::DatasetViewer
            && b.resource == ResourceRef::Dataset("telemetry".into())));
        assert!(sink.iter().any(|b| b.role == Role::SecretAccessor
            && b.resource == ResourceRef::Secret("sink-api-key".into())));
    }

    #[test]
    fn director_gets_admin_and_command_channels() {
        let arch = hydrate(&arch_with_usage(), Some("t0")).unwrap();
        let plan = plan_for_architecture(&arch);

        let director: Vec<_> = plan.for_principal("director-sa").collect();
        assert!(director.iter().any(|b| b.role == Role::Admin
            && b.resource == ResourceRef::Dataflow("flow".into())));
        assert!(director.iter().any(|b| b.role == Role::Publisher
            && b.resource == ResourceRef::Topic("director-completions".into())));
        assert!(director.iter().any(|b| b.role == Role::Subscriber
            && b.resource == ResourceRef::Subscription("director-commands-sub".into())));
    }

    #[test]
    fn plan_is_serializable_and_stable() {
        let arch = hydrate(&arch_with_usage(), Some("t0")).unwrap();
        let plan = plan_for_architecture(&arch);

        let json = serde_json::to_string(&plan).unwrap();
        let back: IamPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }
}

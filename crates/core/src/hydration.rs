//! Architecture hydration
//!
//! Hydration completes a partial architecture document into the fully
//! resolved form every other component consumes: project propagation,
//! derived image URIs, defaulted subscription names, the Director's
//! command/completion channel pair, and full validation of the dependency
//! closure. The input is never partially mutated: hydration works on a copy
//! and returns either the completed architecture or the first violation,
//! tagged with its document path.

use std::collections::{BTreeMap, BTreeSet};

use uuid::Uuid;

use crate::architecture::{Architecture, Dataflow};
use crate::error::{DomainError, Result};
use crate::schema_registry;

/// Complete a partial architecture.
///
/// `image_tag` overrides the tag appended to derived image URIs; when absent
/// a fresh 8-character token is used. Already-set images are preserved, so
/// hydrating a hydrated architecture is a no-op.
pub fn hydrate(arch: &Architecture, image_tag: Option<&str>) -> Result<Architecture> {
    let mut out = arch.clone();
    let tag = match image_tag {
        Some(t) => t.to_string(),
        None => short_token(),
    };

    apply_project(&mut out)?;
    apply_images(&mut out, &tag);
    apply_subscription_names(&mut out);
    apply_command_channels(&mut out);
    validate(&out)?;

    Ok(out)
}

/// An 8-char token suitable for image tags and run-scoped resource names.
pub fn short_token() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn apply_project(arch: &mut Architecture) -> Result<()> {
    let project = arch.project_id.clone();
    if project.is_empty() {
        return Err(DomainError::validation(".project_id", "must be set"));
    }

    let director = &mut arch.service_manager_spec;
    if director.project_id.is_empty() {
        director.project_id = project.clone();
    } else if director.project_id != project {
        return Err(DomainError::validation(
            ".service_manager_spec.project_id",
            format!("contradicts root project id {project}"),
        ));
    }

    for (df_name, flow) in &mut arch.dataflows {
        for (svc_name, svc) in &mut flow.services {
            if svc.project_id.is_empty() {
                svc.project_id = project.clone();
            } else if svc.project_id != project {
                return Err(DomainError::validation(
                    format!(".dataflows.{df_name}.services.{svc_name}.project_id"),
                    format!("contradicts root project id {project}"),
                ));
            }
        }
    }
    Ok(())
}

fn apply_images(arch: &mut Architecture, tag: &str) {
    let (region, project, repo) = (
        arch.region.clone(),
        arch.project_id.clone(),
        arch.image_repo.clone(),
    );
    let derive = |name: &str| format!("{region}-registry/{project}/{repo}/{name}:{tag}");

    let director = &mut arch.service_manager_spec;
    if director.deployment.image.is_empty() {
        director.deployment.image = derive(&director.name);
    }
    for flow in arch.dataflows.values_mut() {
        for svc in flow.services.values_mut() {
            if svc.deployment.image.is_empty() {
                svc.deployment.image = derive(&svc.name);
            }
        }
    }
}

fn apply_subscription_names(arch: &mut Architecture) {
    for flow in arch.dataflows.values_mut() {
        for sub in &mut flow.resources.subscriptions {
            if sub.name.is_empty() {
                sub.name = format!("{}-sub", sub.topic);
            }
        }
    }
}

fn apply_command_channels(arch: &mut Architecture) {
    let director = &mut arch.service_manager_spec;
    if director.command_topic.is_empty() {
        director.command_topic = format!("{}-commands", director.name);
    }
    if director.completion_topic.is_empty() {
        director.completion_topic = format!("{}-completions", director.name);
    }
    if director.command_subscription.is_empty() {
        director.command_subscription = format!("{}-sub", director.command_topic);
    }
    if director.completion_subscription.is_empty() {
        director.completion_subscription = format!("{}-sub", director.completion_topic);
    }
}

/// Validate a (hydrated) architecture. Returns the first violation found,
/// walking dataflows and resource arrays in document order.
pub fn validate(arch: &Architecture) -> Result<()> {
    let director = &arch.service_manager_spec;
    if director.name.is_empty() {
        return Err(DomainError::validation(
            ".service_manager_spec.name",
            "must be set",
        ));
    }
    if director.service_account.is_empty() {
        return Err(DomainError::validation(
            ".service_manager_spec.service_account",
            "must be set",
        ));
    }

    // Topics visible to subscriptions: every dataflow's own topics plus the
    // Director's command channels (externally declared).
    let mut known_topics: BTreeSet<&str> =
        [director.command_topic.as_str(), director.completion_topic.as_str()]
            .into_iter()
            .filter(|t| !t.is_empty())
            .collect();
    for flow in arch.dataflows.values() {
        for topic in &flow.resources.topics {
            known_topics.insert(topic.name.as_str());
        }
    }

    let mut principals: BTreeSet<&str> = BTreeSet::new();
    principals.insert(director.service_account.as_str());

    for (df_name, flow) in &arch.dataflows {
        let base = format!(".dataflows.{df_name}");
        if flow.name != *df_name {
            return Err(DomainError::validation(
                format!("{base}.name"),
                format!("key {df_name} disagrees with name {}", flow.name),
            ));
        }
        validate_resources(&base, flow, &known_topics)?;
        validate_services(&base, flow, &known_topics, &mut principals)?;
        topological_order(flow).map_err(|e| match e {
            DomainError::Validation { path, reason } => {
                DomainError::validation(format!("{base}{path}"), reason)
            }
            other => other,
        })?;
    }
    Ok(())
}

fn validate_resources(
    base: &str,
    flow: &Dataflow,
    known_topics: &BTreeSet<&str>,
) -> Result<()> {
    let mut seen_topics = BTreeSet::new();
    for (i, topic) in flow.resources.topics.iter().enumerate() {
        if topic.name.is_empty() {
            return Err(DomainError::validation(
                format!("{base}.resources.topics[{i}].name"),
                "must be set",
            ));
        }
        if !seen_topics.insert(topic.name.as_str()) {
            return Err(DomainError::validation(
                format!("{base}.resources.topics[{i}].name"),
                format!("duplicate topic {}", topic.name),
            ));
        }
    }

    let mut seen_subs = BTreeSet::new();
    for (i, sub) in flow.resources.subscriptions.iter().enumerate() {
        if !known_topics.contains(sub.topic.as_str()) {
            return Err(DomainError::validation(
                format!("{base}.resources.subscriptions[{i}].topic"),
                format!("references undeclared topic {}", sub.topic),
            ));
        }
        if !sub.name.is_empty() && !seen_subs.insert(sub.name.as_str()) {
            return Err(DomainError::validation(
                format!("{base}.resources.subscriptions[{i}].name"),
                format!("duplicate subscription {}", sub.name),
            ));
        }
    }

    let datasets: BTreeSet<&str> = flow
        .resources
        .bigquery_datasets
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    for (i, table) in flow.resources.bigquery_tables.iter().enumerate() {
        if !datasets.contains(table.dataset.as_str()) {
            return Err(DomainError::validation(
                format!("{base}.resources.bigquery_tables[{i}].dataset"),
                format!("references undeclared dataset {}", table.dataset),
            ));
        }
        if !schema_registry::is_registered(&table.schema_type) {
            return Err(DomainError::validation(
                format!("{base}.resources.bigquery_tables[{i}].schema_type"),
                format!("schema identifier {} is not registered", table.schema_type),
            ));
        }
    }
    Ok(())
}

fn validate_services<'a>(
    base: &str,
    flow: &'a Dataflow,
    known_topics: &BTreeSet<&str>,
    principals: &mut BTreeSet<&'a str>,
) -> Result<()> {
    let subscriptions: BTreeSet<&str> = flow
        .resources
        .subscriptions
        .iter()
        .map(|s| s.name.as_str())
        .collect();
    let buckets: BTreeSet<&str> = flow
        .resources
        .gcs_buckets
        .iter()
        .map(|b| b.name.as_str())
        .collect();
    let tables: BTreeSet<(&str, &str)> = flow
        .resources
        .bigquery_tables
        .iter()
        .map(|t| (t.dataset.as_str(), t.name.as_str()))
        .collect();
    let collections: BTreeSet<&str> = flow
        .resources
        .firestore_collections
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    let caches: BTreeSet<&str> = flow
        .resources
        .cache_instances
        .iter()
        .map(|c| c.name.as_str())
        .collect();

    for (svc_name, svc) in &flow.services {
        let svc_base = format!("{base}.services.{svc_name}");
        if svc.name != *svc_name {
            return Err(DomainError::validation(
                format!("{svc_base}.name"),
                format!("key {svc_name} disagrees with name {}", svc.name),
            ));
        }
        if svc.service_account.is_empty() {
            return Err(DomainError::validation(
                format!("{svc_base}.service_account"),
                "must be set",
            ));
        }
        if !principals.insert(svc.service_account.as_str()) {
            return Err(DomainError::validation(
                format!("{svc_base}.service_account"),
                format!("principal {} is not unique", svc.service_account),
            ));
        }
        for (i, dep) in svc.dependencies.iter().enumerate() {
            if !flow.services.contains_key(dep) {
                return Err(DomainError::validation(
                    format!("{svc_base}.dependencies[{i}]"),
                    format!("references unknown service {dep}"),
                ));
            }
        }

        let usage = &svc.resources;
        for (i, topic) in usage.publishes_topics.iter().enumerate() {
            if !known_topics.contains(topic.as_str()) {
                return Err(DomainError::validation(
                    format!("{svc_base}.resources.publishes_topics[{i}]"),
                    format!("references undeclared topic {topic}"),
                ));
            }
        }
        for (i, sub) in usage.consumes_subscriptions.iter().enumerate() {
            if !subscriptions.contains(sub.as_str()) {
                return Err(DomainError::validation(
                    format!("{svc_base}.resources.consumes_subscriptions[{i}]"),
                    format!("references undeclared subscription {sub}"),
                ));
            }
        }
        for (i, table) in usage.writes_tables.iter().enumerate() {
            if !tables.contains(&(table.dataset.as_str(), table.table.as_str())) {
                return Err(DomainError::validation(
                    format!("{svc_base}.resources.writes_tables[{i}]"),
                    format!("references undeclared table {}.{}", table.dataset, table.table),
                ));
            }
        }
        for (i, bucket) in usage.writes_buckets.iter().enumerate() {
            if !buckets.contains(bucket.as_str()) {
                return Err(DomainError::validation(
                    format!("{svc_base}.resources.writes_buckets[{i}]"),
                    format!("references undeclared bucket {bucket}"),
                ));
            }
        }
        for (i, coll) in usage.reads_collections.iter().enumerate() {
            if !collections.contains(coll.as_str()) {
                return Err(DomainError::validation(
                    format!("{svc_base}.resources.reads_collections[{i}]"),
                    format!("references undeclared collection {coll}"),
                ));
            }
        }
        for (i, cache) in usage.uses_caches.iter().enumerate() {
            if !caches.contains(cache.as_str()) {
                return Err(DomainError::validation(
                    format!("{svc_base}.resources.uses_caches[{i}]"),
                    format!("references undeclared cache {cache}"),
                ));
            }
        }
    }
    Ok(())
}

/// Topological order of a dataflow's services (dependencies first).
///
/// Deterministic: ties are broken by service name. Fails with a Validation
/// error when the dependency graph has a cycle.
pub fn topological_order(flow: &Dataflow) -> Result<Vec<String>> {
    let mut in_degree: BTreeMap<&str, usize> = flow
        .services
        .keys()
        .map(|name| (name.as_str(), 0))
        .collect();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (name, svc) in &flow.services {
        for dep in &svc.dependencies {
            *in_degree.entry(name.as_str()).or_default() += 1;
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(name.as_str());
        }
    }

    let mut ready: Vec<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| *name)
        .collect();
    let mut order = Vec::with_capacity(flow.services.len());
    while !ready.is_empty() {
        let next = ready.remove(0);
        order.push(next.to_string());
        for dependent in dependents.get(next).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(dependent) {
                *deg -= 1;
                if *deg == 0 {
                    // Keep the ready set sorted for deterministic output.
                    let pos = ready.partition_point(|n| *n < *dependent);
                    ready.insert(pos, dependent);
                }
            }
        }
    }

    if order.len() != flow.services.len() {
        let stuck: Vec<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg > 0)
            .map(|(name, _)| *name)
            .collect();
        return Err(DomainError::validation(
            ".services",
            format!("dependency cycle involving {}", stuck.join(", ")),
        ));
    }
    Ok(order)
}

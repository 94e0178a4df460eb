//! Preflight checks and config artifact generation
//!
//! Verifies that every service's source tree is present, then writes the
//! per-service `resources.yaml` projection into it so the projection is
//! embedded into the resulting image at build time.

use std::path::Path;

use tracing::info;

use stratoflow_core::architecture::{Architecture, ResourceManifest};
use stratoflow_core::error::{DomainError, Result};

pub const MANIFEST_FILE: &str = "resources.yaml";

/// Verify prerequisites and write config artifacts.
pub fn run_preflight(architecture: &Architecture) -> Result<()> {
    let director = &architecture.service_manager_spec;
    check_source_tree(&director.name, &director.deployment.source_path)?;

    for (dataflow, svc) in architecture.all_services() {
        check_source_tree(&svc.name, &svc.deployment.source_path)?;

        let manifest = ResourceManifest {
            service: svc.name.clone(),
            dataflow: dataflow.to_string(),
            project_id: architecture.project_id.clone(),
            resources: svc.resources.clone(),
        };
        write_manifest(&svc.deployment.source_path, &manifest)?;
    }
    Ok(())
}

fn check_source_tree(service: &str, source_path: &str) -> Result<()> {
    if source_path.is_empty() {
        return Err(DomainError::Precondition(format!(
            "service {service} has no source path"
        )));
    }
    if !Path::new(source_path).is_dir() {
        return Err(DomainError::Precondition(format!(
            "source tree for {service} missing at {source_path}"
        )));
    }
    Ok(())
}

fn write_manifest(source_path: &str, manifest: &ResourceManifest) -> Result<()> {
    let path = Path::new(source_path).join(MANIFEST_FILE);
    let yaml = serde_yaml::to_string(manifest).map_err(|e| {
        DomainError::Infrastructure(format!("failed to encode manifest for {}: {e}", manifest.service))
    })?;
    std::fs::write(&path, yaml).map_err(|e| {
        DomainError::Infrastructure(format!(
            "failed to write {}: {e}",
            path.display()
        ))
    })?;
    info!(service = %manifest.service, path = %path.display(), "wrote resource manifest");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use stratoflow_core::architecture::*;
    use stratoflow_core::hydration::hydrate;

    fn arch_with_source(dir: &Path) -> Architecture {
        let svc_dir = dir.join("ingest");
        std::fs::create_dir_all(&svc_dir).unwrap();
        let director_dir = dir.join("director");
        std::fs::create_dir_all(&director_dir).unwrap();

        let mut services = BTreeMap::new();
        services.insert(
            "ingest".to_string(),
            ServiceSpec {
                name: "ingest".into(),
                service_account: "ingest-sa".into(),
                project_id: String::new(),
                dependencies: vec![],
                deployment: DeploymentSpec {
                    source_path: svc_dir.to_string_lossy().to_string(),
                    ..Default::default()
                },
                resources: ServiceResourceUsage {
                    publishes_topics: vec!["readings".into()],
                    ..Default::default()
                },
            },
        );
        let arch = Architecture {
            project_id: "demo".into(),
            region: "europe-west1".into(),
            location: "US".into(),
            image_repo: "imgs".into(),
            service_manager_spec: DirectorSpec {
                name: "director".into(),
                service_account: "director-sa".into(),
                project_id: String::new(),
                deployment: DeploymentSpec {
                    source_path: director_dir.to_string_lossy().to_string(),
                    ..Default::default()
                },
                command_topic: String::new(),
                completion_topic: String::new(),
                command_subscription: String::new(),
                completion_subscription: String::new(),
            },
            dataflows: BTreeMap::from([(
                "telemetry".to_string(),
                Dataflow {
                    name: "telemetry".into(),
                    lifecycle: LifecyclePolicy::default(),
                    services,
                    resources: CloudResourcesSpec {
                        topics: vec![TopicConfig {
                            name: "readings".into(),
                        }],
                        ..Default::default()
                    },
                },
            )]),
        };
        hydrate(&arch, Some("t0")).unwrap()
    }

    #[test]
    fn writes_projection_into_source_tree() {
        let dir = tempfile::tempdir().unwrap();
        let arch = arch_with_source(dir.path());

        run_preflight(&arch).unwrap();

        let written = dir.path().join("ingest").join(MANIFEST_FILE);
        let manifest: ResourceManifest =
            serde_yaml::from_str(&std::fs::read_to_string(written).unwrap()).unwrap();
        assert_eq!(manifest.service, "ingest");
        assert_eq!(manifest.dataflow, "telemetry");
        assert_eq!(manifest.project_id, "demo");
        assert_eq!(manifest.resources.publishes_topics, vec!["readings"]);
    }

    #[test]
    fn missing_source_tree_is_a_precondition_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut arch = arch_with_source(dir.path());
        if let Some(flow) = arch.dataflows.get_mut("telemetry") {
            if let Some(svc) = flow.services.get_mut("ingest") {
                svc.deployment.source_path = dir.path().join("nowhere").to_string_lossy().into();
            }
        }

        let err = run_preflight(&arch).unwrap_err();
        assert!(matches!(err, DomainError::Precondition(_)));
        assert!(err.to_string().contains("ingest"));
    }
}

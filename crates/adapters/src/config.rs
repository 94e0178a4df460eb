//! Service runtime configuration
//!
//! Every application service reads the same environment surface
//! (`PROJECT_ID`, `SERVICE_NAME`, `DATAFLOW_NAME`, `SERVICE_DIRECTOR_URL`,
//! `PORT`) plus the embedded `resources.yaml` projection the Conductor wrote
//! into its source tree before build.

use std::path::{Path, PathBuf};

use stratoflow_core::architecture::ResourceManifest;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Resource manifest not found: {0}")]
    ManifestNotFound(PathBuf),

    #[error("Failed to read resource manifest: {0}")]
    ManifestRead(#[from] std::io::Error),

    #[error("Failed to parse resource manifest: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Resource manifest mismatch: {0}")]
    ManifestMismatch(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

const DEFAULT_MANIFEST_PATH: &str = "resources.yaml";

#[derive(Debug, Clone)]
pub struct ServiceRuntimeConfig {
    pub project_id: String,
    pub service_name: String,
    pub dataflow_name: String,
    pub director_url: Option<String>,
    pub port: u16,
    pub manifest_path: PathBuf,
}

impl ServiceRuntimeConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load through an arbitrary lookup, so tests need not touch the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let project_id = lookup("PROJECT_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("PROJECT_ID".to_string()))?;
        let service_name = lookup("SERVICE_NAME")
            .ok_or_else(|| ConfigError::MissingEnvVar("SERVICE_NAME".to_string()))?;
        let dataflow_name = lookup("DATAFLOW_NAME")
            .ok_or_else(|| ConfigError::MissingEnvVar("DATAFLOW_NAME".to_string()))?;
        let director_url = lookup("SERVICE_DIRECTOR_URL");

        let port = lookup("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?;

        let manifest_path = PathBuf::from(
            lookup("RESOURCES_MANIFEST_PATH").unwrap_or_else(|| DEFAULT_MANIFEST_PATH.to_string()),
        );

        let config = Self {
            project_id,
            service_name,
            dataflow_name,
            director_url,
            port,
            manifest_path,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() {
            return Err(ConfigError::InvalidValue(
                "PROJECT_ID must not be empty".to_string(),
            ));
        }
        if self.service_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVICE_NAME must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Read and shape-check the embedded `resources.yaml` projection.
    pub fn load_manifest(&self) -> Result<ResourceManifest> {
        load_manifest_for(&self.manifest_path, &self.service_name, &self.dataflow_name)
    }
}

/// Load a resource manifest and check it belongs to the given service.
pub fn load_manifest_for(
    path: &Path,
    service_name: &str,
    dataflow_name: &str,
) -> Result<ResourceManifest> {
    if !path.exists() {
        return Err(ConfigError::ManifestNotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let manifest: ResourceManifest = serde_yaml::from_str(&content)?;
    if manifest.service != service_name {
        return Err(ConfigError::ManifestMismatch(format!(
            "manifest is for service {}, running as {service_name}",
            manifest.service
        )));
    }
    if manifest.dataflow != dataflow_name {
        return Err(ConfigError::ManifestMismatch(format!(
            "manifest is for dataflow {}, running in {dataflow_name}",
            manifest.dataflow
        )));
    }
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use stratoflow_core::architecture::ServiceResourceUsage;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn loads_with_defaults() {
        let config = ServiceRuntimeConfig::from_lookup(lookup_from(&[
            ("PROJECT_ID", "demo"),
            ("SERVICE_NAME", "ingest"),
            ("DATAFLOW_NAME", "telemetry"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.manifest_path, PathBuf::from("resources.yaml"));
        assert!(config.director_url.is_none());
    }

    #[test]
    fn missing_project_is_an_error() {
        let err = ServiceRuntimeConfig::from_lookup(lookup_from(&[
            ("SERVICE_NAME", "ingest"),
            ("DATAFLOW_NAME", "telemetry"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(v) if v == "PROJECT_ID"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = ServiceRuntimeConfig::from_lookup(lookup_from(&[
            ("PROJECT_ID", "demo"),
            ("SERVICE_NAME", "ingest"),
            ("DATAFLOW_NAME", "telemetry"),
            ("PORT", "not-a-port"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));
    }

    #[test]
    fn manifest_shape_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.yaml");
        let manifest = ResourceManifest {
            service: "ingest".into(),
            dataflow: "telemetry".into(),
            project_id: "demo".into(),
            resources: ServiceResourceUsage {
                publishes_topics: vec!["readings".into()],
                ..Default::default()
            },
        };
        std::fs::write(&path, serde_yaml::to_string(&manifest).unwrap()).unwrap();

        let loaded = load_manifest_for(&path, "ingest", "telemetry").unwrap();
        assert_eq!(loaded, manifest);

        let err = load_manifest_for(&path, "other", "telemetry").unwrap_err();
        assert!(matches!(err, ConfigError::ManifestMismatch(_)));
    }
}

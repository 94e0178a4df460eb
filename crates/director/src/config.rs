//! Director configuration

use std::path::PathBuf;

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error("Architecture definition not found: {0}")]
    DefinitionNotFound(PathBuf),

    #[error("Failed to read architecture definition: {0}")]
    DefinitionRead(#[from] std::io::Error),

    #[error("Failed to parse architecture definition: {0}")]
    ParseYaml(#[from] serde_yaml::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct DirectorConfig {
    pub project_id: String,
    /// Path to the architecture document baked into the image.
    pub services_def_path: PathBuf,
    pub port: u16,
    /// Whether to run the command-bus consumer alongside the HTTP surface.
    pub enable_command_bus: bool,
}

impl DirectorConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let project_id = lookup("PROJECT_ID")
            .ok_or_else(|| ConfigError::MissingEnvVar("PROJECT_ID".to_string()))?;

        let services_def_path = PathBuf::from(
            lookup("SERVICES_DEF_PATH").unwrap_or_else(|| "services.yaml".to_string()),
        );

        let port = lookup("PORT")
            .unwrap_or_else(|| "8080".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidValue("PORT".to_string()))?;

        let enable_command_bus = lookup("ENABLE_COMMAND_BUS")
            .unwrap_or_else(|| "true".to_string())
            .parse::<bool>()
            .map_err(|_| ConfigError::InvalidValue("ENABLE_COMMAND_BUS".to_string()))?;

        Ok(Self {
            project_id,
            services_def_path,
            port,
            enable_command_bus,
        })
    }

    /// Read and parse the architecture document.
    pub fn load_architecture(&self) -> Result<stratoflow_core::Architecture> {
        if !self.services_def_path.exists() {
            return Err(ConfigError::DefinitionNotFound(
                self.services_def_path.clone(),
            ));
        }
        let content = std::fs::read_to_string(&self.services_def_path)?;
        let mut arch: stratoflow_core::Architecture = serde_yaml::from_str(&content)?;
        // The project id is environment-specific and always wins.
        arch.project_id = self.project_id.clone();
        Ok(arch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let config =
            DirectorConfig::from_lookup(lookup_from(&[("PROJECT_ID", "demo")])).unwrap();
        assert_eq!(config.port, 8080);
        assert!(config.enable_command_bus);
        assert_eq!(config.services_def_path, PathBuf::from("services.yaml"));
    }

    #[test]
    fn project_id_is_required() {
        let err = DirectorConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: String, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: String, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration shared by the pipeline stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the on-disk module cache
    pub modules_dir: PathBuf,
    /// Scratch directory used for atomic module installation
    pub modules_tmp_dir: PathBuf,
    /// Upper bound on concurrent image checks during validation (unbounded if unset)
    pub max_concurrent_image_checks: Option<usize>,
    /// Run the executor in dry-run mode unless told otherwise
    pub dry_run: bool,
    /// Name or path of the docker binary used by the CLI backend
    pub docker_binary: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let root = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("startosis");

        Self {
            modules_dir: root.join("modules"),
            modules_tmp_dir: root.join("modules-tmp"),
            max_concurrent_image_checks: None,
            dry_run: false,
            docker_binary: "docker".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a YAML file; missing fields take their defaults
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml_str(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                error,
            },
            other => other,
        })
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
                path: "<inline>".to_string(),
                error: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_image_checks == Some(0) {
            return Err(ConfigError::Invalid(
                "max_concurrent_image_checks must be greater than zero".to_string(),
            ));
        }
        if self.modules_dir == self.modules_tmp_dir {
            return Err(ConfigError::Invalid(
                "modules_dir and modules_tmp_dir must be different directories".to_string(),
            ));
        }
        Ok(())
    }
}

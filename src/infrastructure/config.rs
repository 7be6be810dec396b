//! Configuration management
//!
//! Settings come from built-in defaults, then a YAML file
//! (`$STAGELINE_CONFIG` or `./.stageline.yaml`), then `STAGELINE_*`
//! environment variables. Command-line flags override all of them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "STAGELINE_CONFIG";

/// Config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = ".stageline.yaml";

/// Errors while loading configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Cannot read config file {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// Config file is not valid YAML for [`Config`]
    #[error("Invalid config: {0}")]
    Parse(String),

    /// Environment override has an unusable value
    #[error("Invalid value '{value}' for {key}")]
    InvalidValue {
        /// Variable name
        key: String,
        /// Offending value
        value: String,
    },
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level; logging stays off when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Image build binary
    pub docker_binary: String,
    /// Tag repository; the manifest name when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_prefix: Option<String>,
    /// Build context directory
    pub context_dir: PathBuf,
    /// Upper bound on concurrently building stages
    pub max_parallel: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            docker_binary: "docker".to_string(),
            tag_prefix: None,
            context_dir: PathBuf::from("."),
            max_parallel: crate::executor::DEFAULT_MAX_PARALLEL,
        }
    }
}

impl Config {
    /// Loads the config file (if any) and applies environment overrides
    ///
    /// # Errors
    ///
    /// Fails when a config file exists but cannot be read or parsed, or when
    /// an override is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Like [`load`](Self::load) with a custom environment lookup
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load).
    pub fn load_with(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let config = match env(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.is_file() {
                    Self::from_file(local)?
                } else {
                    Self::default()
                }
            }
        };
        config.with_env_overrides(env)
    }

    /// Reads a YAML config file
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Self::from_yaml(&text)
    }

    /// Parses YAML config text; missing keys take their defaults
    ///
    /// # Errors
    ///
    /// Fails on malformed YAML or unknown value types.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `STAGELINE_LOG_LEVEL`, `STAGELINE_DOCKER`,
    /// `STAGELINE_TAG_PREFIX` and `STAGELINE_MAX_PARALLEL`
    ///
    /// # Errors
    ///
    /// Fails when `STAGELINE_MAX_PARALLEL` is not a positive number.
    pub fn with_env_overrides(
        mut self,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(level) = env("STAGELINE_LOG_LEVEL") {
            self.log_level = Some(level);
        }
        if let Some(binary) = env("STAGELINE_DOCKER") {
            self.docker_binary = binary;
        }
        if let Some(prefix) = env("STAGELINE_TAG_PREFIX") {
            self.tag_prefix = Some(prefix);
        }
        if let Some(value) = env("STAGELINE_MAX_PARALLEL") {
            self.max_parallel = value
                .parse()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: "STAGELINE_MAX_PARALLEL".to_string(),
                    value,
                })?;
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.docker_binary, "docker");
        assert_eq!(config.max_parallel, 4);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_config_from_yaml_partial() {
        let config = Config::from_yaml("tag_prefix: registry.local/claude-flow\nmax_parallel: 2\n").unwrap();
        assert_eq!(config.tag_prefix.as_deref(), Some("registry.local/claude-flow"));
        assert_eq!(config.max_parallel, 2);
        assert_eq!(config.docker_binary, "docker");
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
        assert!(Config::from_yaml("max_parallel: many").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default()
            .with_env_overrides(env_of(&[
                ("STAGELINE_LOG_LEVEL", "debug"),
                ("STAGELINE_DOCKER", "podman"),
                ("STAGELINE_MAX_PARALLEL", "8"),
            ]))
            .unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.docker_binary, "podman");
        assert_eq!(config.max_parallel, 8);

        let err = Config::default()
            .with_env_overrides(env_of(&[("STAGELINE_MAX_PARALLEL", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_load_from_config_env() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("stageline.yaml");
        std::fs::write(&path, "docker_binary: /usr/local/bin/docker\ncontext_dir: /src\n").unwrap();
        let path_str = path.display().to_string();

        let config = Config::load_with(env_of(&[
            (CONFIG_ENV, path_str.as_str()),
            ("STAGELINE_TAG_PREFIX", "cf"),
        ]))
        .unwrap();
        assert_eq!(config.docker_binary, "/usr/local/bin/docker");
        assert_eq!(config.context_dir, PathBuf::from("/src"));
        assert_eq!(config.tag_prefix.as_deref(), Some("cf"));
    }

    #[test]
    fn test_load_missing_config_file() {
        let err = Config::load_with(env_of(&[(CONFIG_ENV, "/nonexistent/stageline.yaml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}

//! ami.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cadence::Cadence;
use crate::types::{DEFAULT_SAMPLES_PER_ENTITY, Population};

/// Environment variable naming the file-backed source path base.
pub const FILE_PATH_BASE_ENV: &str = "AMI2_FILE_PATH_BASE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AmiConfig {
    pub population: Population,
    pub tables: TablesConfig,
    pub source: SourceConfig,
    pub persist: PersistConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TablesConfig {
    pub samples_per_entity: u32,
}

impl Default for TablesConfig {
    fn default() -> Self {
        Self {
            samples_per_entity: DEFAULT_SAMPLES_PER_ENTITY,
        }
    }
}

/// What the orchestrator does when the data source cannot be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceFailurePolicy {
    /// Close the failed source and try to reopen it next cycle.
    #[default]
    Retry,
    /// Stop the orchestration loop with an error.
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Base path of the file-backed source. Absent selects shared memory.
    pub file_path_base: Option<String>,
    pub shared_memory_segment: String,
    pub on_unavailable: SourceFailurePolicy,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            file_path_base: None,
            shared_memory_segment: "ami".to_string(),
            on_unavailable: SourceFailurePolicy::Retry,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    pub dir: PathBuf,
    pub cadence: Cadence,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/lib/ami"),
            cadence: Cadence::Always,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub cadence: Cadence,
    /// Consecutive stale evaluations before an entity is reported unhealthy.
    pub stale_threshold: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            cadence: Cadence::Always,
            stale_threshold: 3,
        }
    }
}

impl AmiConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AmiConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AMI2_FILE_PATH_BASE` from the process environment.
    pub fn with_env(self) -> Self {
        self.with_file_path_base(std::env::var(FILE_PATH_BASE_ENV).ok())
    }

    /// Override the file source locator when one is given.
    pub fn with_file_path_base(mut self, base: Option<String>) -> Self {
        if let Some(base) = base.filter(|b| !b.is_empty()) {
            self.source.file_path_base = Some(base);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tables.samples_per_entity == 0 {
            return Err(ConfigError::Invalid(
                "tables.samples_per_entity must be at least 1".to_string(),
            ));
        }
        if self.population.entity_count() == 0 {
            return Err(ConfigError::Invalid(
                "population must contain at least one entity".to_string(),
            ));
        }
        self.persist
            .cadence
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("persist.cadence: {e}")))?;
        self.monitor
            .cadence
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("monitor.cadence: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = AmiConfig::from_toml_str("").unwrap();
        assert_eq!(config.population, Population::default());
        assert_eq!(config.tables.samples_per_entity, 128);
        assert!(config.source.file_path_base.is_none());
        assert_eq!(config.persist.cadence, Cadence::Always);
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[population]
workers = 4
graph_managers = 2
monitors = 1
max_clients = 16

[tables]
samples_per_entity = 8

[source]
file_path_base = "/tmp/run1"
on_unavailable = "abort"

[persist]
dir = "/tmp/ami"
cadence = { every_cycles = 10 }

[monitor]
cadence = { interval = "5s" }
stale_threshold = 2
"#;
        let config = AmiConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.population.entity_count(), 23);
        assert_eq!(config.source.file_path_base.as_deref(), Some("/tmp/run1"));
        assert_eq!(config.source.on_unavailable, SourceFailurePolicy::Abort);
        assert_eq!(config.persist.cadence, Cadence::EveryCycles(10));
        assert_eq!(config.monitor.cadence, Cadence::Interval("5s".to_string()));
        assert_eq!(config.monitor.stale_threshold, 2);
    }

    #[test]
    fn zero_samples_rejected() {
        let result = AmiConfig::from_toml_str("[tables]\nsamples_per_entity = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_population_rejected() {
        let toml_str =
            "[population]\nworkers = 0\ngraph_managers = 0\nmonitors = 0\nmax_clients = 0\n";
        assert!(matches!(
            AmiConfig::from_toml_str(toml_str),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn file_path_base_override() {
        let config = AmiConfig::default().with_file_path_base(Some("/tmp/run2".to_string()));
        assert_eq!(config.source.file_path_base.as_deref(), Some("/tmp/run2"));

        let config = config.with_file_path_base(None);
        assert_eq!(config.source.file_path_base.as_deref(), Some("/tmp/run2"));

        let config = AmiConfig::default().with_file_path_base(Some(String::new()));
        assert!(config.source.file_path_base.is_none());
    }
}

//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the link-state service and its fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkStateConfig {
    /// Maximum number of node ids waiting in the fetch queue.
    pub fetch_queue_capacity: usize,
    /// Maximum number of external notifications waiting to be applied.
    pub notification_buffer: usize,
    /// Also backfill nodes whose cost is unknown, not only their links.
    pub fetch_costs: bool,
}

impl Default for LinkStateConfig {
    fn default() -> Self {
        Self {
            fetch_queue_capacity: 256,
            notification_buffer: 1024,
            fetch_costs: true,
        }
    }
}

impl LinkStateConfig {
    /// Parse a YAML document; missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Channel capacities must be non-zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "fetch_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.notification_buffer == 0 {
            return Err(ConfigError::Invalid(
                "notification_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = LinkStateConfig::from_yaml_str("fetch_costs: false\n").unwrap();
        assert!(!config.fetch_costs);
        assert_eq!(config.fetch_queue_capacity, 256);
        assert_eq!(config.notification_buffer, 1024);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = LinkStateConfig::from_yaml_str("fetch_queue_capacity: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "fetch_queue_capacity: 8\nnotification_buffer: 16").unwrap();

        let config = LinkStateConfig::load(file.path()).unwrap();
        assert_eq!(config.fetch_queue_capacity, 8);
        assert_eq!(config.notification_buffer, 16);
        assert!(config.fetch_costs);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = LinkStateConfig::load("/nonexistent/linkstate.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

//! Service configuration, persisted as JSON.
//!
//! A missing file is not an error: the defaults describe a service with no
//! per-driver settings that auto-loads nothing. Saving goes through a
//! temporary file and an atomic rename so a crash never leaves a truncated
//! configuration behind.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{DaqError, DaqResult};
use crate::task::BackpressurePolicy;

pub const DEFAULT_CONFIG_PATH: &str = "config/daqhub.json";

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Per-driver settings keyed by driver name
    pub drivers: HashMap<String, DriverConfig>,
    /// Load every configured driver on startup
    pub auto_load_drivers: bool,
    /// Upper bound for one driver's device query
    pub discovery_timeout_ms: u64,
    pub tasks: TaskDefaults,
    pub logging: LoggingConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            drivers: HashMap::new(),
            auto_load_drivers: true,
            discovery_timeout_ms: 5000,
            tasks: TaskDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Settings handed to one driver adapter at load time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DriverConfig {
    /// Location of the native driver binary, checked before initialization
    pub driver_path: Option<PathBuf>,
    /// Reject the adapter unless it reports exactly this version
    pub expected_version: Option<String>,
    pub device_model: String,
    /// Adapter-specific settings
    pub parameters: Map<String, Value>,
    /// Initialization timeout
    pub timeout_ms: u64,
    pub debug_mode: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_path: None,
            expected_version: None,
            device_model: String::new(),
            parameters: Map::new(),
            timeout_ms: 10_000,
            debug_mode: false,
        }
    }
}

impl DriverConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Defaults applied to every task created by the task manager
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskDefaults {
    /// Ring buffer capacity in sample blocks
    pub buffer_capacity: usize,
    pub backpressure: BackpressurePolicy,
    /// Time covered by one driver read
    pub read_interval_ms: u64,
    /// Slack granted to a worker on top of one read period when stopping
    pub shutdown_grace_ms: u64,
    /// Upper bound on the sample data one task may hold in its buffer
    pub max_buffer_bytes: usize,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            buffer_capacity: 64,
            backpressure: BackpressurePolicy::DropOldest,
            read_interval_ms: 100,
            shutdown_grace_ms: 500,
            max_buffer_bytes: 64 * 1024 * 1024,
        }
    }
}

impl TaskDefaults {
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Output format for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

impl ServiceConfig {
    /// Load from `path`, falling back to defaults if the file does not exist
    pub async fn load(path: impl AsRef<Path>) -> DaqResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).await?;
        let config = Self::from_json_str(&content)?;
        tracing::info!(
            path = %path.display(),
            drivers = config.drivers.len(),
            "Loaded service configuration"
        );
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> DaqResult<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> DaqResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let json = serde_json::to_string_pretty(self)?;

        // Write to temporary file first
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, json).await?;
        fs::rename(&temp_path, path).await?;
        Ok(())
    }

    pub fn validate(&self) -> DaqResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(DaqError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }
        if self.tasks.buffer_capacity == 0 {
            return Err(DaqError::Config("tasks.buffer_capacity must be at least 1".into()));
        }
        if self.tasks.read_interval_ms == 0 {
            return Err(DaqError::Config("tasks.read_interval_ms must be at least 1".into()));
        }
        if self.tasks.max_buffer_bytes == 0 {
            return Err(DaqError::Config("tasks.max_buffer_bytes must be at least 1".into()));
        }
        if self.discovery_timeout_ms == 0 {
            return Err(DaqError::Config("discovery_timeout_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = ServiceConfig::load(dir.path().join("absent.json")).await.unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[tokio::test]
    async fn test_save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("daqhub.json");

        let mut config = ServiceConfig::default();
        config.drivers.insert(
            "JY5500".to_string(),
            DriverConfig {
                device_model: "JY5500".to_string(),
                timeout_ms: 2000,
                ..DriverConfig::default()
            },
        );
        config.tasks.backpressure = BackpressurePolicy::Block;
        config.save(&path).await.unwrap();

        assert!(!path.with_extension("tmp").exists());
        let loaded = ServiceConfig::load(&path).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config = ServiceConfig::from_json_str(
            r#"{"auto_load_drivers": false, "tasks": {"backpressure": "block"}}"#,
        )
        .unwrap();
        assert!(!config.auto_load_drivers);
        assert_eq!(config.tasks.backpressure, BackpressurePolicy::Block);
        assert_eq!(config.tasks.buffer_capacity, 64);
        assert_eq!(config.tasks.max_buffer_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_rejects_bad_log_level() {
        let result = ServiceConfig::from_json_str(r#"{"logging": {"level": "loud"}}"#);
        assert!(matches!(result, Err(DaqError::Config(_))));
    }

    #[test]
    fn test_rejects_zero_buffer_budget() {
        let result = ServiceConfig::from_json_str(r#"{"tasks": {"max_buffer_bytes": 0}}"#);
        assert!(matches!(result, Err(DaqError::Config(ref m)) if m.contains("max_buffer_bytes")));
    }
}

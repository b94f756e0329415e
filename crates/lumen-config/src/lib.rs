//! Configuration for the lumen runtime.
//!
//! A single TOML document configures the instance registry, the cleanup
//! coordinator, the task pool and logging. Every key is optional; unknown
//! keys are rejected so typos surface at load time.

mod logging;

use std::path::Path;
use std::time::Duration;

use lumen_memory::{CleanupConfig, MemoryThresholds, RegistryConfig, MAX_PRIORITY};
use lumen_scheduler::PoolConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use logging::{init_tracing, LoggingConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // `Display` embeds a source snippet; keep only the message.
        ConfigError::Toml(err.message().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LumenConfig {
    pub registry: RegistrySection,
    pub cleanup: CleanupSection,
    pub tasks: TasksSection,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrySection {
    pub max_instances: usize,
    /// Instances registered at or above this priority are never auto-evicted.
    pub eviction_exempt_priority: u8,
}

impl Default for RegistrySection {
    fn default() -> Self {
        let defaults = RegistryConfig::default();
        Self {
            max_instances: defaults.max_instances,
            eviction_exempt_priority: defaults.eviction_exempt_priority,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupSection {
    pub interval_ms: u64,
    /// Quiet period treated as an idle window. `0` disables idle passes.
    pub idle_delay_ms: u64,
    pub shed_watermark: f64,
    pub thresholds: MemoryThresholds,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            interval_ms: 60_000,
            idle_delay_ms: 5_000,
            shed_watermark: 0.5,
            thresholds: MemoryThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TasksSection {
    /// `0` forces synchronous execution.
    pub workers: usize,
    pub timeout_ms: u64,
    pub queue_capacity: usize,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            workers: 4,
            timeout_ms: 30_000,
            queue_capacity: 64,
        }
    }
}

impl LumenConfig {
    /// Load and validate a config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: LumenConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.max_instances == 0 {
            return Err(invalid("registry.max_instances must be at least 1"));
        }
        if self.registry.eviction_exempt_priority > MAX_PRIORITY {
            return Err(invalid(format!(
                "registry.eviction_exempt_priority must be within 0..={MAX_PRIORITY}"
            )));
        }
        if self.cleanup.interval_ms == 0 {
            return Err(invalid("cleanup.interval_ms must be positive"));
        }
        let watermark = self.cleanup.shed_watermark;
        if !(watermark > 0.0 && watermark <= 1.0) {
            return Err(invalid("cleanup.shed_watermark must be within (0, 1]"));
        }
        if !self.cleanup.thresholds.is_monotonic() {
            return Err(invalid(
                "cleanup.thresholds must satisfy low_mb <= medium_mb <= high_mb <= critical_mb",
            ));
        }
        if self.tasks.timeout_ms == 0 {
            return Err(invalid("tasks.timeout_ms must be positive"));
        }
        if self.tasks.queue_capacity == 0 {
            return Err(invalid("tasks.queue_capacity must be at least 1"));
        }
        Ok(())
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::from(&self.registry)
    }

    pub fn cleanup_config(&self) -> CleanupConfig {
        CleanupConfig::from(&self.cleanup)
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::from(&self.tasks)
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

impl From<&RegistrySection> for RegistryConfig {
    fn from(section: &RegistrySection) -> Self {
        RegistryConfig {
            max_instances: section.max_instances,
            eviction_exempt_priority: section.eviction_exempt_priority,
        }
    }
}

impl From<&CleanupSection> for CleanupConfig {
    fn from(section: &CleanupSection) -> Self {
        CleanupConfig {
            interval: Duration::from_millis(section.interval_ms),
            idle_delay: (section.idle_delay_ms > 0)
                .then(|| Duration::from_millis(section.idle_delay_ms)),
            thresholds: section.thresholds,
            shed_watermark: section.shed_watermark,
        }
    }
}

impl From<&TasksSection> for PoolConfig {
    fn from(section: &TasksSection) -> Self {
        PoolConfig {
            workers: section.workers,
            task_timeout: Duration::from_millis(section.timeout_ms),
            queue_capacity: section.queue_capacity,
        }
    }
}

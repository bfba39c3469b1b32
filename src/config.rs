//! Tuning configuration, read once at startup. Cluster credentials come
//! from the kubeconfig instead (see `kubeconfig`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::kernel::dispatcher::DispatcherConfig;
use crate::kernel::reactor::ReactorConfig;
use crate::kernel::retry::RetryPolicy;
use crate::kernel::telemetry::DEFAULT_LOG_CAPACITY;
use crate::kernel::time::TICK_MS;

pub const DEFAULT_CONFIG_FILE: &str = "placer.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to parse kubeconfig {path}: {source}")]
    Kubeconfig {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Shape of the workload created per placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkloadConfig {
    pub namespace: String,
    pub name_prefix: String,
    pub container_name: String,
    pub image: String,
    pub restart_policy: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            name_prefix: "nginx".to_string(),
            container_name: "nginx".to_string(),
            image: "nginx:latest".to_string(),
            restart_policy: "OnFailure".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_ms: u64,
    pub refresh_interval_ms: u64,
    pub refresh_timeout_ms: u64,
    pub provision_timeout_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: TICK_MS,
            refresh_interval_ms: 2000,
            refresh_timeout_ms: 5000,
            provision_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacerConfig {
    #[serde(default)]
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_arena_capacity")]
    pub arena_capacity: usize,
    #[serde(default = "default_log_capacity")]
    pub placement_log_capacity: usize,
}

fn default_arena_capacity() -> usize {
    60
}

fn default_log_capacity() -> usize {
    DEFAULT_LOG_CAPACITY
}

impl Default for PlacerConfig {
    fn default() -> Self {
        Self {
            workload: WorkloadConfig::default(),
            timing: TimingConfig::default(),
            retry: RetryPolicy::default(),
            arena_capacity: default_arena_capacity(),
            placement_log_capacity: default_log_capacity(),
        }
    }
}

impl PlacerConfig {
    /// `$HOME/.kube/placer.json`, or `placer.json` in the working directory
    /// when HOME is unset.
    pub fn default_path() -> PathBuf {
        match std::env::var_os("HOME").filter(|h| !h.is_empty()) {
            Some(home) => PathBuf::from(home).join(".kube").join(DEFAULT_CONFIG_FILE),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        }
    }

    /// Reads `path` if it exists, defaults otherwise. An explicitly
    /// requested file must exist; use `load` for that.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.tick_ms == 0 {
            return Err(ConfigError::Invalid("timing.tick_ms must be positive".into()));
        }
        if self.timing.provision_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timing.provision_timeout_ms must be positive".into()));
        }
        if self.timing.refresh_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timing.refresh_timeout_ms must be positive".into()));
        }
        if self.arena_capacity == 0 {
            return Err(ConfigError::Invalid("arena_capacity must be positive".into()));
        }
        if self.workload.name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid("workload.name_prefix must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return Err(ConfigError::Invalid("retry.jitter_factor must be within [0, 1]".into()));
        }
        Ok(())
    }

    pub fn reactor_config(&self) -> ReactorConfig {
        ReactorConfig {
            tick: Duration::from_millis(self.timing.tick_ms),
            refresh_interval: Duration::from_millis(self.timing.refresh_interval_ms),
            refresh_timeout: Duration::from_millis(self.timing.refresh_timeout_ms),
            arena_capacity: self.arena_capacity,
            log_capacity: self.placement_log_capacity,
            dispatcher: DispatcherConfig {
                provision_timeout: Duration::from_millis(self.timing.provision_timeout_ms),
                retry: self.retry.clone(),
            },
        }
    }

    /// Overall bound for one HTTP exchange with the cluster API: the longer
    /// of the two per-call timeouts.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.refresh_timeout_ms.max(self.timing.provision_timeout_ms))
    }
}

//! Pipeline configuration
//!
//! Resolution order: defaults, then an optional YAML file (`version: 1`),
//! then `BLOCKSET_*` environment variables, then CLI flags (applied by the
//! binary). [`PipelineConfig::validate`] runs last.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const ENV_WORK_DIR: &str = "BLOCKSET_WORK_DIR";
pub const ENV_PARALLELISM: &str = "BLOCKSET_PARALLELISM";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}. {hint}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    #[error("Unsupported configuration version {found}. Supported versions: {}", .supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    #[error("Environment variable {var}={value:?} is not valid: {reason}")]
    InvalidEnv {
        var: String,
        value: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }
}

/// Batch orchestration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent worker processes (0=auto: half the logical CPUs)
    pub parallelism: usize,

    /// Lengths within this distance of 0 or N run inline
    pub parallel_cutoff: usize,

    /// Batch context, worker artifacts and worker logs
    pub work_dir: PathBuf,

    /// Sleep between worker status polls (1..=10000)
    pub poll_interval_ms: u64,

    /// Kill workers on SIGINT/SIGTERM/SIGABRT/SIGBUS/SIGSEGV
    pub trap_signals: bool,

    /// zlib level used by `encode` (0..=9)
    pub compression_level: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parallelism: 0,
            parallel_cutoff: 6,
            work_dir: PathBuf::from(".work"),
            poll_interval_ms: 50,
            trap_signals: true,
            compression_level: 9,
        }
    }
}

/// YAML schema v1; every field is optional and overrides the default
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileV1 {
    pub version: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallelism: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_cutoff: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trap_signals: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<u32>,
}

impl PipelineConfig {
    /// Defaults overridden by a YAML file
    pub fn from_yaml(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;
        match file.version {
            None => return Err(ConfigError::MissingVersion),
            Some(1) => {}
            Some(found) => {
                return Err(ConfigError::UnsupportedVersion {
                    found,
                    supported: vec![1],
                })
            }
        }

        let mut config = Self::default();
        if let Some(v) = file.parallelism {
            config.parallelism = v;
        }
        if let Some(v) = file.parallel_cutoff {
            config.parallel_cutoff = v;
        }
        if let Some(v) = file.work_dir {
            config.work_dir = v;
        }
        if let Some(v) = file.poll_interval_ms {
            config.poll_interval_ms = v;
        }
        if let Some(v) = file.trap_signals {
            config.trap_signals = v;
        }
        if let Some(v) = file.compression_level {
            config.compression_level = v;
        }
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            parallelism: Some(self.parallelism),
            parallel_cutoff: Some(self.parallel_cutoff),
            work_dir: Some(self.work_dir.clone()),
            poll_interval_ms: Some(self.poll_interval_ms),
            trap_signals: Some(self.trap_signals),
            compression_level: Some(self.compression_level),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    /// Apply `BLOCKSET_WORK_DIR` / `BLOCKSET_PARALLELISM` from the process
    /// environment.
    pub fn with_env(self) -> ConfigResult<Self> {
        self.with_env_from(|var| std::env::var(var).ok())
    }

    pub fn with_env_from<F>(mut self, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_WORK_DIR).filter(|v| !v.is_empty()) {
            self.work_dir = PathBuf::from(dir);
        }
        if let Some(value) = lookup(ENV_PARALLELISM) {
            self.parallelism = value.trim().parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::InvalidEnv {
                    var: ENV_PARALLELISM.to_string(),
                    value: value.clone(),
                    reason: e.to_string(),
                }
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.parallelism > 1024 {
            return Err(ConfigError::range_with_hint(
                "parallelism",
                self.parallelism,
                0,
                1024,
                "Number of workers must be reasonable (0=auto)",
            ));
        }

        if self.poll_interval_ms < 1 || self.poll_interval_ms > 10_000 {
            return Err(ConfigError::range_with_hint(
                "poll_interval_ms",
                self.poll_interval_ms,
                1,
                10_000,
                "Poll interval must be positive and under 10s",
            ));
        }

        if self.compression_level > 9 {
            return Err(ConfigError::range_with_hint(
                "compression_level",
                self.compression_level,
                0,
                9,
                "zlib levels run from 0 (store) to 9 (best)",
            ));
        }

        Ok(())
    }

    /// Worker count with `0` resolved to `max(num_cpus / 2, 1)`
    pub fn effective_parallelism(&self) -> usize {
        if self.parallelism == 0 {
            (num_cpus::get() / 2).max(1)
        } else {
            self.parallelism
        }
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::client::RetryPolicy;
use crate::core::operation::OperationKind;
use crate::orchestration::{AbortPolicy, ExecutorConfig, OperationOverride};
use crate::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "http://coe-ragpipeline-dev:8001";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    /// Per-attempt timeout of a remote call.
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    /// Snippets fetched by the single-query agent.
    pub top_k: usize,
    pub abort_policy: AbortPolicy,
    pub retry: RetryConfig,
    /// Overrides keyed by operation name.
    pub operations: BTreeMap<String, OperationConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 10,
            max_concurrent: 4,
            top_k: 5,
            abort_policy: AbortPolicy::default(),
            retry: RetryConfig::default(),
            operations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Config {
    pub fn ragent_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".ragent"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::ragent_dir()?.join("config.toml"))
    }

    /// Load `~/.ragent/config.toml`, or defaults if it does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            base_url = %config.base_url,
            timeout_secs = config.timeout_secs,
            max_concurrent = config.max_concurrent,
            "config loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Error::Config("base_url must not be empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config("timeout_secs must be positive".to_string()));
        }
        if self.max_concurrent == 0 {
            return Err(Error::Config("max_concurrent must be positive".to_string()));
        }
        if self.retry.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be at least 1.0".to_string()));
        }
        for name in self.operations.keys() {
            name.parse::<OperationKind>()
                .map_err(|name| Error::Config(format!("unknown operation '{}' in [operations]", name)))?;
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            multiplier: self.retry.multiplier,
        }
    }

    pub fn executor_config(&self) -> Result<ExecutorConfig> {
        self.validate()?;
        let mut overrides = HashMap::new();
        for (name, op) in &self.operations {
            let kind = name
                .parse::<OperationKind>()
                .map_err(|name| Error::Config(format!("unknown operation '{}' in [operations]", name)))?;
            overrides.insert(
                kind,
                OperationOverride {
                    timeout: op.timeout_secs.map(Duration::from_secs),
                    max_attempts: op.max_attempts,
                },
            );
        }
        Ok(ExecutorConfig {
            max_concurrent: self.max_concurrent,
            timeout: self.timeout(),
            retry: self.retry_policy(),
            overrides,
            abort_policy: self.abort_policy,
        })
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

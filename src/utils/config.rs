// src/utils/config.rs
//! Runtime configuration
//!
//! Loaded from an optional `refs.toml` in the working directory, then
//! overridden by `SENTRA_REFS__<SECTION>__<KEY>` environment variables.

use crate::runtime::sandbox::SandboxConfig;
use crate::utils::errors::{RefError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "SENTRA_REFS";

/// Top-level configuration for the reference runtime
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker pool sizing
    pub pools: PoolConfig,

    /// Authorization policy
    pub sandbox: SandboxConfig,

    /// Log output
    pub logging: LoggingConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum threads in the bounded pool (futures and `send`)
    pub max_size: usize,

    /// Maximum threads in the cached pool (`send_off`); unbounded by default
    pub blocking_max_size: usize,

    /// Idle time before a cached worker retires, in milliseconds
    pub keep_alive_ms: u64,

    /// Prefix for worker thread names
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            blocking_max_size: usize::MAX,
            keep_alive_ms: 60_000,
            thread_name_prefix: "refs".to_string(),
        }
    }
}

impl PoolConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    /// Load from `refs.toml` (optional) and the environment
    pub fn load() -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name("refs").required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let config: RuntimeConfig = settings.try_deserialize()?;
        config.validate()?;
        debug!("Runtime configuration loaded: {:?}", config);
        Ok(config)
    }

    /// Load from an explicit file; the format follows the extension
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;

        let config: RuntimeConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pools cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.pools.max_size == 0 {
            return Err(RefError::Config("pools.max_size must be at least 1".into()));
        }
        if self.pools.blocking_max_size == 0 {
            return Err(RefError::Config(
                "pools.blocking_max_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

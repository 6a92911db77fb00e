//! Engine configuration.
//!
//! Sources, later overriding earlier:
//! 1. Built-in defaults (every field has one)
//! 2. An optional TOML file
//! 3. Environment variables prefixed `HERALD__`, `__` separating sections,
//!    e.g. `HERALD__ENGINE__MAX_RETRIES=5`

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub engine: EngineConfig,
    pub retry: RetryConfig,
    pub sweeper: SweeperConfig,
}

/// Delivery behaviour of the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retries allowed per entry unless the producer overrides it.
    pub max_retries: u32,

    /// Upper bound on a single transport call.
    pub send_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            send_timeout_ms: 10_000,
        }
    }
}

/// Backoff between a failed send and its retry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Zero retries immediately.
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 0,
            multiplier: 2.0,
            max_delay_ms: 300_000,
        }
    }
}

/// Stall sweep schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperConfig {
    /// How long an entry may stay `sent` before it is reconciled.
    /// Keep this well above the provider's usual webhook latency.
    pub stall_cutoff_secs: u64,

    pub interval_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stall_cutoff_secs: 600,
            interval_secs: 60,
        }
    }
}

impl HeraldConfig {
    /// Load defaults, then `path` (if given), then `HERALD__*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        let config: HeraldConfig = builder
            .add_source(
                config::Environment::with_prefix("HERALD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.send_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "engine.send_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.sweeper.stall_cutoff_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweeper.stall_cutoff_secs must be greater than zero".into(),
            ));
        }
        if self.sweeper.stall_cutoff_secs.saturating_mul(1000) <= self.engine.send_timeout_ms {
            return Err(ConfigError::Invalid(
                "sweeper.stall_cutoff_secs must exceed engine.send_timeout_ms".into(),
            ));
        }
        if self.sweeper.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "sweeper.interval_secs must be greater than zero".into(),
            ));
        }
        if !(self.retry.multiplier >= 1.0) {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be at least 1.0".into(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.send_timeout_ms)
    }

    pub fn stall_cutoff(&self) -> Duration {
        Duration::from_secs(self.sweeper.stall_cutoff_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweeper.interval_secs)
    }
}

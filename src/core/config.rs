use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use tracing::debug;

use crate::core::errors::{PoolError, Result};

/// Environment variable consulted by [`PoolConfig::from_env`]
pub const MAX_CONCURRENT_ENV: &str = "ACTIONPOOL_MAX_CONCURRENT";

/// Pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of action executions in flight (0 = host parallelism)
    #[serde(default)]
    pub max_concurrent: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { max_concurrent: 0 }
    }
}

impl PoolConfig {
    /// Create a new builder for PoolConfig
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::new()
    }

    /// Configuration with a fixed concurrency ceiling
    pub fn with_capacity(max_concurrent: usize) -> Self {
        Self { max_concurrent }
    }

    /// Parse a YAML document such as `max_concurrent: 8`
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: PoolConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration overridden by `ACTIONPOOL_MAX_CONCURRENT` when set
    pub fn from_env() -> Result<Self> {
        match std::env::var(MAX_CONCURRENT_ENV) {
            Ok(raw) => Self::from_env_value(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    fn from_env_value(raw: &str) -> Result<Self> {
        let max_concurrent = raw.trim().parse::<usize>().map_err(|e| {
            PoolError::configuration_field(
                format!("{} is not a valid count: {}", MAX_CONCURRENT_ENV, e),
                "max_concurrent",
            )
        })?;
        let config = Self { max_concurrent };
        config.validate()?;
        debug!(max_concurrent, "PoolConfig loaded from environment");
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Semaphore::MAX_PERMITS is usize::MAX >> 3
        if self.max_concurrent > usize::MAX >> 3 {
            return Err(PoolError::configuration_field(
                "max_concurrent exceeds the semaphore permit limit",
                "max_concurrent",
            ));
        }
        Ok(())
    }

    /// The effective ceiling: `max_concurrent`, or the host parallelism when it is 0
    pub fn capacity(&self) -> usize {
        if self.max_concurrent > 0 {
            return self.max_concurrent;
        }
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }
}

/// Builder for PoolConfig
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Set the concurrency ceiling
    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.config.max_concurrent = max_concurrent;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for PoolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Configuration loading and environment variable handling

use crate::domains::execution::DistributionKind;
use crate::domains::logging::{LogFormat, LogLevel};
use crate::domains::ConductorConfig;
use crate::error::{ConfigError, ConfigResult};
use log::debug;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "CONDUCTOR".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ConductorConfig> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: ConductorConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ConductorConfig> {
        let mut config = ConductorConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ConductorConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ConductorConfig) -> ConfigResult<()> {
        self.apply_exchange_overrides(&mut config.exchange)?;
        self.apply_test_overrides(&mut config.test)?;
        self.apply_execution_overrides(&mut config.execution)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_exchange_overrides(
        &self,
        config: &mut crate::domains::exchange::ExchangeConfig,
    ) -> ConfigResult<()> {
        if let Some(url) = self.parse_env::<String>("EXCHANGE_URL")? {
            config.url = url;
        }
        if let Some(root) = self.parse_env::<String>("TOPIC_ROOT")? {
            config.topic_root = root;
        }
        if let Some(millis) = self.parse_env::<u64>("REPLY_TIMEOUT_MS")? {
            config.reply_timeout = Duration::from_millis(millis);
        }
        Ok(())
    }

    fn apply_test_overrides(
        &self,
        config: &mut crate::domains::test::TestConfig,
    ) -> ConfigResult<()> {
        if let Some(url) = self.parse_env::<String>("TEST_BROKER_URL")? {
            config.broker_url = url;
        }
        if let Some(rate) = self.parse_env::<u32>("INITIAL_RATE")? {
            config.initial_rate = rate;
        }
        if let Some(rate) = self.parse_env::<u32>("CEILING_RATE")? {
            config.ceiling_rate = rate;
        }
        if let Some(increment) = self.parse_env::<u32>("RATE_INCREMENT")? {
            config.rate_increment = increment;
        }
        if let Some(parallel) = self.parse_env::<u32>("INITIAL_PARALLEL")? {
            config.initial_parallel = parallel;
        }
        if let Some(parallel) = self.parse_env::<u32>("CEILING_PARALLEL")? {
            config.ceiling_parallel = parallel;
        }
        if let Some(seconds) = self.parse_env::<u64>("TEST_DURATION_SECONDS")? {
            config.duration = Duration::from_secs(seconds);
        }
        if let Some(fcl) = self.parse_env::<u64>("FCL_MS")? {
            config.fcl_ms = fcl;
        }
        Ok(())
    }

    fn apply_execution_overrides(
        &self,
        config: &mut crate::domains::execution::ExecutionConfig,
    ) -> ConfigResult<()> {
        if let Some(millis) = self.parse_env::<u64>("COOL_DOWN_MS")? {
            config.cool_down_period = Duration::from_millis(millis);
        }
        if let Some(kind) = self.parse_env::<DistributionKind>("DISTRIBUTION")? {
            config.distribution = kind;
        }
        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Some(level) = self.parse_env::<LogLevel>("LOG_LEVEL")? {
            config.level = level;
        }
        if let Some(format) = self.parse_env::<LogFormat>("LOG_FORMAT")? {
            config.format = format;
        }
        Ok(())
    }

    /// Read and parse a prefixed environment variable, if set
    fn parse_env<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let key = format!("{}_{}", self.prefix, name);
        match std::env::var(&key) {
            Ok(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::Env {
                    variable: key.clone(),
                    message: e.to_string(),
                }),
            Err(_) => Ok(None),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

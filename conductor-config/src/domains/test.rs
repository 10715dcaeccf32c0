//! Load profile configuration for incremental tests

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_ramp, validate_url, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Load profile configuration
///
/// Rate escalates from `initial_rate` to `ceiling_rate` in steps of
/// `rate_increment`; each time the rate ceiling is passed the rate starts over
/// and parallelism escalates instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Broker under test, handed to workers
    pub broker_url: String,

    pub initial_rate: u32,
    pub ceiling_rate: u32,
    pub rate_increment: u32,

    pub initial_parallel: u32,
    pub ceiling_parallel: u32,
    pub parallel_increment: u32,

    /// Message size in bytes
    pub message_size: u32,

    /// How long each cycle runs
    #[serde(with = "humantime_serde")]
    pub duration: Duration,

    /// Fail-condition-on-latency threshold in milliseconds
    pub fcl_ms: u64,

    /// Optional management interface of the broker under test
    #[serde(skip_serializing_if = "Option::is_none")]
    pub management_interface: Option<String>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            broker_url: "amqp://localhost:5672/test.performance.queue".to_string(),
            initial_rate: 100,
            ceiling_rate: 500,
            rate_increment: 50,
            initial_parallel: 1,
            ceiling_parallel: 16,
            parallel_increment: 1,
            message_size: 256,
            duration: Duration::from_secs(300),
            fcl_ms: 600,
            management_interface: None,
        }
    }
}

impl Validatable for TestConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_url(&self.broker_url, "broker_url", self.domain_name())?;

        validate_positive(self.initial_rate, "initial_rate", self.domain_name())?;
        validate_positive(self.rate_increment, "rate_increment", self.domain_name())?;
        validate_ramp(self.initial_rate, self.ceiling_rate, "rate", self.domain_name())?;

        validate_positive(self.initial_parallel, "initial_parallel", self.domain_name())?;
        validate_positive(
            self.parallel_increment,
            "parallel_increment",
            self.domain_name(),
        )?;
        validate_ramp(
            self.initial_parallel,
            self.ceiling_parallel,
            "parallel",
            self.domain_name(),
        )?;

        validate_positive(self.message_size, "message_size", self.domain_name())?;
        validate_positive(self.fcl_ms, "fcl_ms", self.domain_name())?;

        if self.duration < Duration::from_secs(1) {
            return Err(self.validation_error("duration must be at least one second"));
        }

        if let Some(ref interface) = self.management_interface {
            validate_url(interface, "management_interface", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "test"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(TestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_inverted_ramp_is_rejected() {
        let config = TestConfig {
            initial_rate: 600,
            ..TestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sub_second_duration_is_rejected() {
        let config = TestConfig {
            duration: Duration::from_millis(500),
            ..TestConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_humantime_duration_in_yaml() {
        let yaml = "duration: 5s\ninitial_rate: 100\nceiling_rate: 200\n";
        let config: TestConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.duration, Duration::from_secs(5));
        assert_eq!(config.ceiling_rate, 200);
        assert_eq!(config.rate_increment, 50);
    }
}

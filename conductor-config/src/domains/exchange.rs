//! Control-plane broker connection configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, validate_url, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BROKER_SCHEMES: [&str; 3] = ["memory", "mqtt", "tcp"];

/// Control-plane broker connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Broker the controller and peers meet on
    pub url: String,

    /// Namespace all control topics live under
    pub topic_root: String,

    /// Name the controller announces itself with
    pub client_name: String,

    /// Upper bound for a synchronous request such as a role assignment
    #[serde(with = "humantime_serde")]
    pub reply_timeout: Duration,

    /// Wait between empty polls when collecting replies
    #[serde(with = "humantime_serde")]
    pub collect_wait: Duration,

    /// Empty polls tolerated before a collection gives up
    pub collect_retries: u32,

    /// Reconnection policy
    pub reconnect: ReconnectConfig,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            url: "memory://local".to_string(),
            topic_root: "conductor".to_string(),
            client_name: "controller".to_string(),
            reply_timeout: Duration::from_secs(5),
            collect_wait: Duration::from_millis(50),
            collect_retries: 10,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Reconnection policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Maximum number of connection attempts per operation
    pub max_attempts: u32,

    /// Initial delay between attempts
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Backoff strategy
    pub backoff: BackoffKind,

    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff: BackoffKind::Exponential { base: 2.0 },
            jitter: true,
        }
    }
}

/// Backoff strategy between reconnection attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffKind {
    /// Fixed delay between attempts
    Fixed,

    /// Linear increase: delay = initial_delay * attempt
    Linear,

    /// Exponential increase: delay = initial_delay * base^(attempt-1)
    Exponential { base: f64 },
}

impl Validatable for ExchangeConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_url(&self.url, "url", self.domain_name())?;
        let scheme = self.url.split("://").next().unwrap_or_default().to_ascii_lowercase();
        if !BROKER_SCHEMES.contains(&scheme.as_str()) {
            return Err(self.validation_error(format!(
                "url scheme '{}' is not a supported broker (memory, mqtt, tcp)",
                scheme
            )));
        }
        validate_required_string(&self.topic_root, "topic_root", self.domain_name())?;
        validate_required_string(&self.client_name, "client_name", self.domain_name())?;

        if self.topic_root.contains(['#', '+']) {
            return Err(self.validation_error("topic_root cannot contain wildcard characters"));
        }

        validate_positive(self.reply_timeout.as_millis(), "reply_timeout", self.domain_name())?;
        validate_positive(self.collect_wait.as_millis(), "collect_wait", self.domain_name())?;
        validate_positive(self.collect_retries, "collect_retries", self.domain_name())?;
        validate_positive(
            self.reconnect.max_attempts,
            "reconnect.max_attempts",
            self.domain_name(),
        )?;

        if self.reconnect.initial_delay > self.reconnect.max_delay {
            return Err(self.validation_error(
                "reconnect.initial_delay cannot exceed reconnect.max_delay",
            ));
        }

        if let BackoffKind::Exponential { base } = self.reconnect.backoff {
            if base < 1.0 {
                return Err(self.validation_error(format!(
                    "exponential backoff base must be at least 1.0, got {}",
                    base
                )));
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "exchange"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_config_defaults() {
        let config = ExchangeConfig::default();
        assert_eq!(config.collect_retries, 10);
        assert_eq!(config.collect_wait, Duration::from_millis(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_exchange_config_broker_schemes() {
        for url in ["memory://local", "mqtt://broker:1883", "tcp://10.0.0.5:1883"] {
            let config = ExchangeConfig {
                url: url.to_string(),
                ..ExchangeConfig::default()
            };
            assert!(config.validate().is_ok(), "{} should be accepted", url);
        }

        let config = ExchangeConfig {
            url: "amqp://broker:5672".to_string(),
            ..ExchangeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exchange_config_rejects_wildcard_root() {
        let config = ExchangeConfig {
            topic_root: "conductor/#".to_string(),
            ..ExchangeConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_exchange_config_rejects_shrinking_backoff() {
        let mut config = ExchangeConfig::default();
        config.reconnect.backoff = BackoffKind::Exponential { base: 0.5 };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_yaml_shape() {
        let yaml = "type: exponential\nbase: 1.5\n";
        let backoff: BackoffKind = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(backoff, BackoffKind::Exponential { base: 1.5 });

        let fixed: BackoffKind = serde_yaml::from_str("type: fixed\n").unwrap();
        assert_eq!(fixed, BackoffKind::Fixed);
    }
}

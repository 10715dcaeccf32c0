//! Engine timing and distribution configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Engine timing and distribution configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Pause between cycles so the broker under test can drain
    #[serde(with = "humantime_serde")]
    pub cool_down_period: Duration,

    /// Length of one polling round while awaiting quorum
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Delay between stopping senders and stopping receivers
    #[serde(with = "humantime_serde")]
    pub inflight_delay: Duration,

    /// How roles are handed out to peers
    pub distribution: DistributionKind,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            cool_down_period: Duration::from_secs(1),
            poll_interval: Duration::from_secs(1),
            inflight_delay: Duration::from_millis(250),
            distribution: DistributionKind::Balanced,
        }
    }
}

/// Distribution policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionKind {
    #[default]
    Balanced,
    ExclusiveBalanced,
    Legacy,
    NonAssigning,
}

impl FromStr for DistributionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "balanced" => Ok(DistributionKind::Balanced),
            "exclusive-balanced" => Ok(DistributionKind::ExclusiveBalanced),
            "legacy" => Ok(DistributionKind::Legacy),
            "non-assigning" => Ok(DistributionKind::NonAssigning),
            _ => Err(format!("Invalid distribution strategy: {}", s)),
        }
    }
}

impl fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistributionKind::Balanced => "balanced",
            DistributionKind::ExclusiveBalanced => "exclusive-balanced",
            DistributionKind::Legacy => "legacy",
            DistributionKind::NonAssigning => "non-assigning",
        };
        f.write_str(name)
    }
}

impl Validatable for ExecutionConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.poll_interval.as_millis(),
            "poll_interval",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "execution"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distribution_kind_parsing() {
        assert_eq!(
            "exclusive_balanced".parse::<DistributionKind>().unwrap(),
            DistributionKind::ExclusiveBalanced
        );
        assert_eq!(
            "Non-Assigning".parse::<DistributionKind>().unwrap(),
            DistributionKind::NonAssigning
        );
        assert!("round-robin".parse::<DistributionKind>().is_err());
    }

    #[test]
    fn test_zero_poll_interval_is_rejected() {
        let config = ExecutionConfig {
            poll_interval: Duration::ZERO,
            ..ExecutionConfig::default()
        };
        assert!(config.validate().is_err());
    }
}

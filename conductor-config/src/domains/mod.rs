//! Domain-specific configuration modules

pub mod exchange;
pub mod execution;
pub mod lab;
pub mod logging;
pub mod test;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Conductor configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConductorConfig {
    /// Control-plane broker connection
    #[serde(default)]
    pub exchange: exchange::ExchangeConfig,

    /// Load profile of the incremental test
    #[serde(default)]
    pub test: test::TestConfig,

    /// Engine timing and distribution policy
    #[serde(default)]
    pub execution: execution::ExecutionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,

    /// Simulated peers (optional, for lab runs)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lab: Option<lab::LabConfig>,
}

impl ConductorConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.exchange.validate()?;
        self.test.validate()?;
        self.execution.validate()?;
        self.logging.validate()?;

        if let Some(ref lab) = self.lab {
            lab.validate()?;
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = ConductorConfig {
            lab: Some(lab::LabConfig::default()),
            ..ConductorConfig::default()
        };
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}

//! Simulated peers for lab runs

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Simulated peer fleet
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    /// Unassigned peers waiting to receive a worker role
    pub workers: usize,

    /// Inspector peers (never reassigned)
    pub inspectors: usize,

    /// Load (rate × parallel count) above which simulated workers fail
    pub breaking_point: u64,

    /// Latency reported at zero load, in milliseconds
    pub base_latency_ms: f64,

    /// How long a simulated worker runs before reporting its outcome
    #[serde(with = "humantime_serde")]
    pub run_time: Duration,
}

impl Default for LabConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            inspectors: 0,
            breaking_point: 2_000,
            base_latency_ms: 5.0,
            run_time: Duration::from_millis(200),
        }
    }
}

impl Validatable for LabConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.workers, "workers", self.domain_name())?;
        validate_positive(self.breaking_point, "breaking_point", self.domain_name())?;

        if self.base_latency_ms < 0.0 {
            return Err(self.validation_error("base_latency_ms cannot be negative"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "lab"
    }
}

//! Error types for distribution and test execution

use conductor_exchange::ExchangeError;
use thiserror::Error;

/// Role distribution errors
#[derive(Error, Debug, Clone)]
pub enum DistributionError {
    #[error("There are not enough available peers to distribute")]
    NoPeers,

    #[error("There are not enough worker peers to run the test")]
    NoWorkers,

    #[error("Unable to assign {peer} as {role}: {reason}")]
    Assignment {
        peer: String,
        role: String,
        reason: String,
    },

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),
}

/// Test execution errors
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("Distribution error: {0}")]
    Distribution(#[from] DistributionError),

    #[error("Exchange error: {0}")]
    Exchange(#[from] ExchangeError),

    #[error("Test execution was interrupted")]
    Interrupted,
}

impl ExecutionError {
    /// Whether the error only fails the current cycle
    ///
    /// Exchange trouble during a cycle (a lost publish, a missing quorum, a
    /// peer refusing a setting) is judged as a failed cycle and the ramp goes
    /// on. Distribution errors and interruptions end the run.
    pub fn is_cycle_failure(&self) -> bool {
        match self {
            ExecutionError::Exchange(err) => !err.is_fatal(),
            ExecutionError::Distribution(_) | ExecutionError::Interrupted => false,
        }
    }
}

//! Conductor execution engine
//!
//! Distributes roles across the connected peers and drives an incremental
//! load test: a ramp of cycles at growing rate and parallelism, each judged
//! from the verdicts the workers report.

pub mod distribution;
pub mod downloader;
pub mod error;
pub mod executor;
pub mod processor;
pub mod profile;

// Re-export main types
pub use distribution::{
    strategy_for, AssignmentPolicy, Balanced, BalancedStrategy, DistributionStrategy,
    ExclusiveBalanced, ExclusiveBalancedStrategy, Legacy, LegacyStrategy, NonAssigning,
    NonAssigningStrategy, PeerEndpoint, Strategy,
};
pub use downloader::{NoopDownloader, ReportsDownloader};
pub use error::{DistributionError, ExecutionError};
pub use executor::{CycleReport, ExecutorState, IncrementalTestExecutor};
pub use processor::TestProcessor;
pub use profile::TestProfile;

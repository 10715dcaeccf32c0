//! Domain-driven configuration management for Conductor
//!
//! Configuration is split by functional domain (exchange, test profile,
//! execution, logging, lab), loaded from YAML with environment variable
//! overrides and validated per domain.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    exchange::{BackoffKind, ExchangeConfig, ReconnectConfig},
    execution::{DistributionKind, ExecutionConfig},
    lab::LabConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    test::TestConfig,
    ConductorConfig,
};

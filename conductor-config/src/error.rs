//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `CONDUCTOR_*` variable is set but does not parse
    #[error("Invalid value for {variable}: {message}")]
    Env { variable: String, message: String },

    #[error("Invalid {domain} configuration: {message}")]
    Domain { domain: String, message: String },
}

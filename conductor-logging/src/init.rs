use conductor_config::{LogFormat, LoggingConfig};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("Invalid log directive '{directive}': {reason}")]
    InvalidDirective { directive: String, reason: String },
}

/// Filter for the configured level and directives
///
/// When the configured filter cannot be parsed `RUST_LOG` is used instead,
/// and `info` when that is unset too. Extra directives are checked one by one
/// so a typo is reported instead of silently widening the filter.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    let mut spec = config.level.to_string();
    for directive in &config.directives {
        EnvFilter::try_new(directive).map_err(|err| LoggingError::InvalidDirective {
            directive: directive.clone(),
            reason: err.to_string(),
        })?;
        spec.push(',');
        spec.push_str(directive);
    }

    Ok(EnvFilter::try_new(&spec)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info")))
}

/// Install the global subscriber
///
/// Only the first call installs anything; later calls are logged and ignored.
pub fn init_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    // try_init so a second initialisation (tests, embedding) does not panic
    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    if installed.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::Domain {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::Domain {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::Domain {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate that an initial value does not exceed its ceiling
pub fn validate_ramp<T>(initial: T, ceiling: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if initial > ceiling {
        return Err(ConfigError::Domain {
            domain: domain.to_string(),
            message: format!(
                "initial {} ({}) exceeds its ceiling ({})",
                field_name, initial, ceiling
            ),
        });
    }
    Ok(())
}

/// Validate a URL
pub fn validate_url(url: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    validate_required_string(url, field_name, domain)?;

    url::Url::parse(url).map_err(|e| ConfigError::Domain {
        domain: domain.to_string(),
        message: format!("{} has invalid URL format: {}", field_name, e),
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_required_string() {
        assert!(validate_required_string("value", "field", "test").is_ok());
        assert!(validate_required_string("", "field", "test").is_err());
        assert!(validate_required_string("   ", "field", "test").is_err());
    }

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1u32, "field", "test").is_ok());
        assert!(validate_positive(0u32, "field", "test").is_err());
        assert!(validate_positive(0.5f64, "field", "test").is_ok());
    }

    #[test]
    fn test_validate_ramp() {
        assert!(validate_ramp(100, 200, "rate", "test").is_ok());
        assert!(validate_ramp(200, 200, "rate", "test").is_ok());
        let err = validate_ramp(300, 200, "rate", "test").unwrap_err();
        assert!(err.to_string().contains("exceeds its ceiling"));
    }

    #[test]
    fn test_validate_url() {
        assert!(validate_url("amqp://localhost:5672/queue", "url", "test").is_ok());
        assert!(validate_url("memory://local", "url", "test").is_ok());
        assert!(validate_url("not a url", "url", "test").is_err());
        assert!(validate_url("", "url", "test").is_err());
    }
}

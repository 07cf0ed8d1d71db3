//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits >= 1)
//! - Reject filters without a name
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Unknown filter names are caught later, when the registry resolves them

use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a config.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("proxy name must not be empty")]
    EmptyProxyName,

    #[error("stream filter #{0} has an empty name")]
    EmptyFilterName(usize),

    #[error("limits.max_phase_reentries must be at least 1")]
    ZeroReentryLimit,
}

pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::EmptyProxyName);
    }

    for (i, filter) in config.stream_filters.iter().enumerate() {
        if filter.name.trim().is_empty() {
            errors.push(ValidationError::EmptyFilterName(i));
        }
    }

    if config.limits.max_phase_reentries == 0 {
        errors.push(ValidationError::ZeroReentryLimit);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::FilterConfig;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn reports_every_error() {
        let mut config = ProxyConfig::default();
        config.name = " ".into();
        config.limits.max_phase_reentries = 0;
        config
            .stream_filters
            .push(FilterConfig::new("", serde_json::Value::Null));

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::EmptyProxyName,
                ValidationError::EmptyFilterName(0),
                ValidationError::ZeroReentryLimit,
            ]
        );
    }
}

use std::net::SocketAddr;

use crate::{
    config::models::{ProxyConfig, VirtualHostConfig},
    core::rule_table::RuleTable,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid rule: {message}")]
    InvalidRule { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Proxy configuration validator
pub struct ProxyConfigValidator;

impl ProxyConfigValidator {
    /// Validate the entire proxy configuration, reporting every problem found.
    pub fn validate(config: &ProxyConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if config.vhosts.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "vhosts".to_string(),
            });
        }

        for vhost in &config.vhosts {
            errors.extend(Self::validate_vhost(vhost));
        }

        let (_, site_errors) = RuleTable::build(config);
        errors.extend(site_errors.into_iter().map(|e| ValidationError::InvalidRule {
            message: e.to_string(),
        }));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_vhost(vhost: &VirtualHostConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if vhost.name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "vhost name".to_string(),
            });
        }

        if !vhost.mount.starts_with('/') {
            errors.push(ValidationError::InvalidField {
                field: format!("vhost '{}' mount", vhost.name),
                message: "Mount points must start with '/'".to_string(),
            });
        }

        if vhost.rules.is_empty() {
            errors.push(ValidationError::InvalidField {
                field: format!("vhost '{}' rules", vhost.name),
                message: "At least one revproxy rule is required".to_string(),
            });
        }

        errors
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }
        let mut message = format!("Found {} validation errors:", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("\n  {}. {}", i + 1, error));
        }
        message
    }
}

use regex::Regex;

use crate::config::models::ListenerOptions;

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Listener options validator
pub struct OptionsValidator;

impl OptionsValidator {
    /// Validate the entire options snapshot, collecting every problem found
    pub fn validate(options: &ListenerOptions) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = options.http_addr() {
            errors.push(e);
        }

        if options.enable_tls {
            if let Err(e) = options.tls_addr() {
                errors.push(e);
            }
            if options.tls_port == options.http_port {
                errors.push(ValidationError::InvalidField {
                    field: "tls_port".to_string(),
                    message: "TLS port must differ from the HTTP port".to_string(),
                });
            }
            if let Err(e) = options.tls_material() {
                errors.push(e);
            }
        }

        if let Err(e) = Regex::new(&options.health_check_pattern) {
            errors.push(ValidationError::InvalidField {
                field: "health_check_pattern".to_string(),
                message: e.to_string(),
            });
        }

        if options.shutdown_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "shutdown_timeout_secs".to_string(),
                message: "Shutdown grace period must be at least one second".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let mut message = format!("Found {} configuration error(s):", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("\n  {}. {error}", i + 1));
        }
        message
    }
}

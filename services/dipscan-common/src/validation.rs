//! Configuration validation for dipscan services.
//!
//! Provides validation logic for configuration fields to ensure
//! all required values are present and within valid ranges.

use thiserror::Error;

use crate::config::{Config, ObservabilityConfig, QuotesConfig, ServerConfig};

/// Known quote sources.
pub const QUOTE_SOURCES: &[&str] = &["sina", "mock"];

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid port {port}: must be between 1 and 65535")]
    InvalidPort { port: u16, field: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.observability.validate(),
            self.server.validate(),
            self.quotes.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ValidationError::Multiple(errors))
        }
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        let level = self.log_level.to_lowercase();
        if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("unknown level '{}'", self.log_level),
            });
        }
        if self.log_format != "json" && self.log_format != "pretty" {
            return Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("expected 'json' or 'pretty', got '{}'", self.log_format),
            });
        }
        Ok(())
    }
}

impl Validate for ServerConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort {
                port: self.port,
                field: "server.port".into(),
            });
        }
        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "server.host".into(),
            });
        }
        Ok(())
    }
}

impl Validate for QuotesConfig {
    fn validate(&self) -> ValidationResult<()> {
        if !QUOTE_SOURCES.contains(&self.source.as_str()) {
            return Err(ValidationError::InvalidValue {
                field: "quotes.source".into(),
                reason: format!("expected one of {:?}, got '{}'", QUOTE_SOURCES, self.source),
            });
        }
        if self.endpoint.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "quotes.endpoint".into(),
            });
        }
        if self.codes.is_empty() {
            return Err(ValidationError::MissingField {
                field: "quotes.codes".into(),
            });
        }
        if let Some(bad) = self
            .codes
            .iter()
            .find(|c| c.is_empty() || !c.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_'))
        {
            return Err(ValidationError::InvalidValue {
                field: "quotes.codes".into(),
                reason: format!("'{}' is not a valid instrument code", bad),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "quotes.timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.cache_ttl_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "quotes.cache_ttl_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if !(-12..=14).contains(&self.market_utc_offset_hours) {
            return Err(ValidationError::InvalidValue {
                field: "quotes.market_utc_offset_hours".into(),
                reason: format!("{} is outside -12..=14", self.market_utc_offset_hours),
            });
        }
        Ok(())
    }
}

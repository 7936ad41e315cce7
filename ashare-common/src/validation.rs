//! Configuration validation.
//!
//! A run aborts at startup when any of these checks fail; row-level
//! data problems are handled elsewhere and never abort.

use std::collections::HashSet;
use thiserror::Error;

use crate::config::{CollectorConfig, Config, ObservabilityConfig, RequestConfig, SourceConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

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

fn invalid(field: &str, reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Collapse a list of errors into a single result.
fn collect(mut errors: Vec<ValidationError>) -> ValidationResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ValidationError::Multiple(errors)),
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        const LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
        const FORMATS: &[&str] = &["json", "pretty"];

        let mut errors = Vec::new();
        if !LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            errors.push(invalid(
                "observability.log_level",
                format!("must be one of {:?}", LEVELS),
            ));
        }
        if !FORMATS.contains(&self.log_format.as_str()) {
            errors.push(invalid(
                "observability.log_format",
                format!("must be one of {:?}", FORMATS),
            ));
        }
        collect(errors)
    }
}

impl Validate for RequestConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.min_delay_ms > self.max_delay_ms {
            errors.push(ValidationError::Conflict {
                reason: format!(
                    "request.min_delay_ms ({}) exceeds request.max_delay_ms ({})",
                    self.min_delay_ms, self.max_delay_ms
                ),
            });
        }
        if !(self.backoff_factor.is_finite() && self.backoff_factor >= 1.0) {
            errors.push(invalid("request.backoff_factor", "must be a finite number >= 1.0"));
        }
        if self.timeout_secs == 0 {
            errors.push(invalid("request.timeout_secs", "must be greater than 0"));
        }
        if self.user_agents.iter().any(|ua| ua.trim().is_empty()) {
            errors.push(invalid("request.user_agents", "entries must not be blank"));
        }
        if let Some(proxy) = &self.proxy {
            if !(proxy.starts_with("http://")
                || proxy.starts_with("https://")
                || proxy.starts_with("socks5://"))
            {
                errors.push(invalid("request.proxy", "must be an http, https or socks5 URL"));
            }
        }

        collect(errors)
    }
}

impl Validate for CollectorConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if self.max_workers == 0 {
            errors.push(invalid("collector.max_workers", "must be at least 1"));
        }
        if self.max_workers > 64 {
            errors.push(invalid("collector.max_workers", "must not exceed 64"));
        }
        if !(0.0..=1.0).contains(&self.min_success_rate) {
            errors.push(invalid("collector.min_success_rate", "must be within 0.0..=1.0"));
        }
        if self.max_sources_per_stock == 0 {
            errors.push(invalid("collector.max_sources_per_stock", "must be at least 1"));
        }
        if self.list_sources == 0 {
            errors.push(invalid("collector.list_sources", "must be at least 1"));
        }
        if self.unhealthy_threshold == 0 {
            errors.push(invalid("collector.unhealthy_threshold", "must be at least 1"));
        }
        if self.report_dates.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "collector.report_dates".into(),
            });
        }
        for date in &self.report_dates {
            if !is_iso_date(date) {
                errors.push(invalid(
                    "collector.report_dates",
                    format!("'{}' is not a YYYY-MM-DD date", date),
                ));
            }
        }
        if self.subjects.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "collector.subjects".into(),
            });
        }

        collect(errors)
    }
}

/// Shallow YYYY-MM-DD shape check; calendar validity is checked at parse time.
fn is_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit())
}

fn validate_sources(sources: &[SourceConfig]) -> ValidationResult<()> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for source in sources {
        if source.name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: "sources[].name".into(),
            });
            continue;
        }
        if !seen.insert(source.name.as_str()) {
            errors.push(ValidationError::Conflict {
                reason: format!("source '{}' is configured twice", source.name),
            });
        }
        if source.rate_limit_rpm == Some(0) {
            errors.push(invalid(
                &format!("sources.{}.rate_limit_rpm", source.name),
                "must be greater than 0 when set",
            ));
        }
    }

    if !sources.iter().any(|s| s.enabled) {
        errors.push(ValidationError::Conflict {
            reason: "every data source is disabled".into(),
        });
    }

    collect(errors)
}

impl Config {
    /// Validate the entire configuration.
    pub fn validate(&self) -> ValidationResult<()> {
        let errors: Vec<ValidationError> = [
            self.observability.validate(),
            self.request.validate(),
            self.collector.validate(),
            validate_sources(&self.sources),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        collect(errors)
    }
}

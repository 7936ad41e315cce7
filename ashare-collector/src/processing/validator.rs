//! Field validation for companies, industries and metric values.
//!
//! Invalid companies and industries are excluded from the aggregate; an
//! invalid metric value is dropped to null. Every failure is counted in a
//! [`ValidationReport`] grouped by field and logged.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use super::shenwan::is_shenwan_level1;
use crate::data::{FinancialMetric, IndustryClassification, ListedCompany};

const VALID_FIRST_DIGITS: &[u8] = b"03468";
const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', '"', '\'', '\\', '|', '?', '*'];
const MAX_LEVEL_LEN: usize = 50;
const MAX_SAMPLES: usize = 20;

/// Upper bound for investment real estate, in yuan
const MAX_INVEST_REALESTATE: f64 = 1e12;
/// Upper bound for every other subject, in yuan
const MAX_SUBJECT_VALUE: f64 = 1e14;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationIssue {
    #[error("invalid code {code:?}: {reason}")]
    Code { code: String, reason: &'static str },

    #[error("invalid name {name:?} for {code}: {reason}")]
    Name {
        code: String,
        name: String,
        reason: &'static str,
    },

    #[error("invalid {subject} value {value} for {code} at {period}: {reason}")]
    Value {
        code: String,
        period: String,
        subject: String,
        value: f64,
        reason: &'static str,
    },

    #[error("invalid industry for {code}: {reason}")]
    Industry { code: String, reason: String },
}

impl ValidationIssue {
    /// Field the issue is grouped under in reports.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Code { .. } => "code",
            Self::Name { .. } => "name",
            Self::Value { .. } => "value",
            Self::Industry { .. } => "industry",
        }
    }
}

// ============================================================================
// Field Rules
// ============================================================================

pub fn validate_code(code: &str) -> Result<(), ValidationIssue> {
    let fail = |reason| {
        Err(ValidationIssue::Code {
            code: code.to_string(),
            reason,
        })
    };

    if code.len() != 6 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return fail("not six digits");
    }
    if !VALID_FIRST_DIGITS.contains(&code.as_bytes()[0]) {
        return fail("first digit not in 0/3/4/6/8");
    }
    if code.starts_with("92") {
        return fail("reserved 92 prefix");
    }
    Ok(())
}

pub fn validate_name(code: &str, name: &str) -> Result<(), ValidationIssue> {
    let fail = |reason| {
        Err(ValidationIssue::Name {
            code: code.to_string(),
            name: name.to_string(),
            reason,
        })
    };

    let len = name.trim().chars().count();
    if !(2..=100).contains(&len) {
        return fail("length outside 2..=100");
    }
    if name.contains(FORBIDDEN_NAME_CHARS) {
        return fail("forbidden character");
    }
    Ok(())
}

pub fn validate_company(company: &ListedCompany) -> Result<(), ValidationIssue> {
    validate_code(&company.code)?;
    validate_name(&company.code, &company.name)
}

/// Check a present metric value. `None` is always valid.
pub fn validate_metric(metric: &FinancialMetric) -> Result<(), ValidationIssue> {
    let Some(value) = metric.value else {
        return Ok(());
    };
    let fail = |reason| {
        Err(ValidationIssue::Value {
            code: metric.code.clone(),
            period: metric.period.to_string(),
            subject: metric.subject.clone(),
            value,
            reason,
        })
    };

    if !value.is_finite() {
        return fail("not finite");
    }
    if value < 0.0 && metric.subject != "TOTAL_OWNER_EQUITY" {
        return fail("negative");
    }
    let limit = if metric.subject == "INVEST_REALESTATE" {
        MAX_INVEST_REALESTATE
    } else {
        MAX_SUBJECT_VALUE
    };
    if value.abs() > limit {
        return fail("out of range");
    }
    Ok(())
}

/// Check a non-empty classification. Returns a warning for a level 1
/// outside the Shenwan list.
pub fn validate_industry(industry: &IndustryClassification) -> Result<Option<String>, ValidationIssue> {
    let fail = |reason: String| {
        Err(ValidationIssue::Industry {
            code: industry.code.clone(),
            reason,
        })
    };

    let Some(level1) = industry.level1.as_deref() else {
        return fail("missing level 1".into());
    };
    for (label, level) in [("level 2", &industry.level2), ("level 3", &industry.level3)] {
        if let Some(level) = level {
            if level.chars().count() > MAX_LEVEL_LEN {
                return fail(format!("{} longer than {} chars", label, MAX_LEVEL_LEN));
            }
        }
    }

    if is_shenwan_level1(level1) {
        Ok(None)
    } else {
        Ok(Some(format!("non-Shenwan level 1 {:?} for {}", level1, industry.code)))
    }
}

// ============================================================================
// Validation Report
// ============================================================================

/// Totals of one validation pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    /// Failure count per field
    pub errors_by_field: BTreeMap<String, usize>,
    /// First few failure messages
    pub samples: Vec<String>,
    pub warnings: usize,
}

impl ValidationReport {
    pub fn record_valid(&mut self) {
        self.total += 1;
        self.valid += 1;
    }

    pub fn record_invalid(&mut self, issue: &ValidationIssue) {
        self.total += 1;
        self.invalid += 1;
        *self.errors_by_field.entry(issue.field().to_string()).or_default() += 1;
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push(issue.to_string());
        }
    }

    /// Fold another report into this one.
    pub fn absorb(&mut self, other: ValidationReport) {
        self.total += other.total;
        self.valid += other.valid;
        self.invalid += other.invalid;
        self.warnings += other.warnings;
        for (field, count) in other.errors_by_field {
            *self.errors_by_field.entry(field).or_default() += count;
        }
        let room = MAX_SAMPLES.saturating_sub(self.samples.len());
        self.samples.extend(other.samples.into_iter().take(room));
    }

    /// Valid share of all checked records, 0 when nothing was checked.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.valid as f64 / self.total as f64
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} checked, {} valid, {} invalid", self.total, self.valid, self.invalid)?;
        if !self.errors_by_field.is_empty() {
            let fields: Vec<String> = self
                .errors_by_field
                .iter()
                .map(|(field, count)| format!("{}={}", field, count))
                .collect();
            write!(f, " ({})", fields.join(", "))?;
        }
        Ok(())
    }
}

// ============================================================================
// Batch Validation
// ============================================================================

/// Keep valid companies.
pub fn validate_companies(companies: Vec<ListedCompany>) -> (Vec<ListedCompany>, ValidationReport) {
    let mut report = ValidationReport::default();
    let mut valid = Vec::with_capacity(companies.len());

    for company in companies {
        match validate_company(&company) {
            Ok(()) => {
                report.record_valid();
                valid.push(company);
            }
            Err(issue) => {
                debug!(source = %company.source, %issue, "Rejected company");
                report.record_invalid(&issue);
            }
        }
    }

    if report.invalid > 0 {
        warn!(invalid = report.invalid, total = report.total, "Companies failed validation");
    }
    (valid, report)
}

/// Null out invalid values and their source tag. Only present values are
/// counted.
pub fn sanitize_metrics(metrics: &mut [FinancialMetric], report: &mut ValidationReport) {
    for metric in metrics.iter_mut().filter(|m| m.value.is_some()) {
        match validate_metric(metric) {
            Ok(()) => report.record_valid(),
            Err(issue) => {
                warn!(%issue, source = %metric.source, "Dropping invalid metric value");
                report.record_invalid(&issue);
                metric.value = None;
                metric.source.clear();
            }
        }
    }
}

/// Check a classification; an invalid one is replaced by an empty one.
pub fn sanitize_industry(
    industry: IndustryClassification,
    report: &mut ValidationReport,
) -> IndustryClassification {
    if industry.is_empty() {
        return industry;
    }
    match validate_industry(&industry) {
        Ok(warning) => {
            if let Some(warning) = warning {
                warn!("{}", warning);
                report.warnings += 1;
            }
            report.record_valid();
            industry
        }
        Err(issue) => {
            warn!(%issue, source = %industry.source, "Rejected industry classification");
            report.record_invalid(&issue);
            IndustryClassification::empty(industry.code, industry.source)
        }
    }
}

//! Data quality scoring.
//!
//! Overall score = completeness 30% + accuracy 30% + timeliness 20% +
//! coverage 20%, each on a 0-100 scale.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

/// Reference size of the A-share universe
pub const STANDARD_TOTAL_STOCKS: usize = 5434;

const WEIGHT_COMPLETENESS: f64 = 0.30;
const WEIGHT_ACCURACY: f64 = 0.30;
const WEIGHT_TIMELINESS: f64 = 0.20;
const WEIGHT_COVERAGE: f64 = 0.20;

/// Industry share of the coverage score; periods split the rest
const INDUSTRY_COVERAGE_WEIGHT: f64 = 0.40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    C,
    D,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 95.0 => Self::APlus,
            s if s >= 90.0 => Self::A,
            s if s >= 85.0 => Self::BPlus,
            s if s >= 80.0 => Self::B,
            s if s >= 70.0 => Self::C,
            _ => Self::D,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::BPlus => "B+",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Counts a quality assessment is computed from
#[derive(Debug, Clone, Default)]
pub struct QualityInputs {
    pub total_stocks: usize,
    pub valid_records: usize,
    pub total_records: usize,
    /// Day the data was collected
    pub collected_on: Option<NaiveDate>,
    pub stocks_with_industry: usize,
    /// (period, stocks with at least one value for it)
    pub stocks_with_period: Vec<(NaiveDate, usize)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub overall: f64,
    pub grade: Grade,
    pub completeness: f64,
    pub accuracy: f64,
    pub timeliness: f64,
    pub coverage: f64,
    pub industry_coverage: f64,
    pub period_coverage: Vec<(NaiveDate, f64)>,
    pub issues: Vec<String>,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 100.0).min(100.0)
    }
}

pub fn completeness_score(total_stocks: usize) -> f64 {
    percent(total_stocks, STANDARD_TOTAL_STOCKS)
}

pub fn accuracy_score(valid: usize, total: usize) -> f64 {
    percent(valid, total)
}

/// 100 for same-day data, decaying to a floor of 10 after a month.
pub fn timeliness_score(collected_on: Option<NaiveDate>, today: NaiveDate) -> f64 {
    let Some(collected_on) = collected_on else {
        return 0.0;
    };
    let days = (today - collected_on).num_days().max(0);
    let score = match days {
        0 => 100,
        1..=7 => 80 - days * 5,
        8..=30 => 40 - (days - 7) * 2,
        _ => 10,
    };
    score.clamp(0, 100) as f64
}

/// Returns (coverage, industry coverage, per-period coverage).
pub fn coverage_score(inputs: &QualityInputs) -> (f64, f64, Vec<(NaiveDate, f64)>) {
    let industry = percent(inputs.stocks_with_industry, inputs.total_stocks);
    let periods: Vec<(NaiveDate, f64)> = inputs
        .stocks_with_period
        .iter()
        .map(|(period, n)| (*period, percent(*n, inputs.total_stocks)))
        .collect();

    if periods.is_empty() {
        return (industry, industry, periods);
    }
    let per_period = (1.0 - INDUSTRY_COVERAGE_WEIGHT) / periods.len() as f64;
    let coverage = industry * INDUSTRY_COVERAGE_WEIGHT
        + periods.iter().map(|(_, c)| c * per_period).sum::<f64>();
    (coverage, industry, periods)
}

pub fn assess(inputs: &QualityInputs, today: NaiveDate) -> QualityReport {
    let completeness = completeness_score(inputs.total_stocks);
    let accuracy = accuracy_score(inputs.valid_records, inputs.total_records);
    let timeliness = timeliness_score(inputs.collected_on, today);
    let (coverage, industry_coverage, period_coverage) = coverage_score(inputs);

    let overall = completeness * WEIGHT_COMPLETENESS
        + accuracy * WEIGHT_ACCURACY
        + timeliness * WEIGHT_TIMELINESS
        + coverage * WEIGHT_COVERAGE;

    let mut issues = Vec::new();
    if completeness < 98.0 {
        issues.push(format!(
            "completeness {:.1}%: {} of {} stocks",
            completeness, inputs.total_stocks, STANDARD_TOTAL_STOCKS
        ));
    }
    let invalid = inputs.total_records.saturating_sub(inputs.valid_records);
    if percent(invalid, inputs.total_records) > 5.0 {
        issues.push(format!("validation error rate {:.1}%", percent(invalid, inputs.total_records)));
    }
    if inputs.total_stocks > 0 && industry_coverage < 95.0 {
        issues.push(format!("industry coverage {:.1}%", industry_coverage));
    }
    if let Some((period, latest)) = period_coverage.iter().max_by_key(|(p, _)| *p) {
        if *latest < 90.0 {
            issues.push(format!("{} financial coverage {:.1}%", period, latest));
        }
    }

    QualityReport {
        overall,
        grade: Grade::from_score(overall),
        completeness,
        accuracy,
        timeliness,
        coverage,
        industry_coverage,
        period_coverage,
        issues,
    }
}

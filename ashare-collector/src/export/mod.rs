//! Export of collected data.
//!
//! [`Dataset`] is the stored data of one export, loaded from local storage
//! and indexed by code. [`export_workbook`] renders it to an xlsx file.

pub mod excel;

pub use excel::ExcelExporter;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveDate};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::data::{FinancialMetric, IndustryClassification, ListedCompany, ProviderInfo};
use crate::processing::validator::{validate_company, validate_metric};
use crate::processing::{DiffSummary, QualityInputs, QualityReport, ValidationReport};
use crate::storage::LocalStorage;

// ============================================================================
// Dataset
// ============================================================================

type CellKey = (NaiveDate, String);

/// Companies with their industry and balance-sheet values.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    /// Unique by code, ordered by code
    pub companies: Vec<ListedCompany>,
    pub industries: HashMap<String, IndustryClassification>,
    metrics: HashMap<String, HashMap<CellKey, FinancialMetric>>,
    /// Report periods exported as columns
    pub periods: Vec<NaiveDate>,
    /// Subject keys exported as columns
    pub subjects: Vec<String>,
}

impl Dataset {
    /// Build a dataset from records. Later duplicates of a code are dropped.
    pub fn new(
        companies: Vec<ListedCompany>,
        industries: Vec<IndustryClassification>,
        metrics: Vec<FinancialMetric>,
        periods: Vec<NaiveDate>,
        subjects: Vec<String>,
    ) -> Self {
        let mut seen = HashSet::new();
        let mut companies: Vec<ListedCompany> = companies
            .into_iter()
            .filter(|c| seen.insert(c.code.clone()))
            .collect();
        companies.sort_by(|a, b| a.code.cmp(&b.code));

        let industries = industries.into_iter().map(|i| (i.code.clone(), i)).collect();

        let mut by_code: HashMap<String, HashMap<CellKey, FinancialMetric>> = HashMap::new();
        for metric in metrics {
            by_code
                .entry(metric.code.clone())
                .or_default()
                .insert((metric.period, metric.subject.clone()), metric);
        }

        Self {
            companies,
            industries,
            metrics: by_code,
            periods,
            subjects,
        }
    }

    /// Load stored data, optionally restricted to `codes`.
    pub async fn load(
        storage: &LocalStorage,
        periods: Vec<NaiveDate>,
        subjects: Vec<String>,
        codes: Option<&HashSet<String>>,
    ) -> Result<Self> {
        let keep = |code: &str| codes.map_or(true, |set| set.contains(code));

        let companies: Vec<ListedCompany> = storage
            .get_companies()
            .await
            .context("Failed to load companies")?
            .into_iter()
            .filter(|c| keep(&c.code))
            .collect();
        let industries: Vec<IndustryClassification> = storage
            .get_industries()
            .await
            .context("Failed to load industries")?
            .into_iter()
            .filter(|i| keep(&i.code))
            .collect();
        let metrics: Vec<FinancialMetric> = storage
            .get_all_metrics()
            .await
            .context("Failed to load financial metrics")?
            .into_iter()
            .filter(|m| keep(&m.code))
            .collect();

        Ok(Self::new(companies, industries, metrics, periods, subjects))
    }

    pub fn industry(&self, code: &str) -> Option<&IndustryClassification> {
        self.industries.get(code)
    }

    pub fn metric(&self, code: &str, period: NaiveDate, subject: &str) -> Option<&FinancialMetric> {
        self.metrics.get(code)?.get(&(period, subject.to_string()))
    }

    /// Stored value in yuan, `None` when missing.
    pub fn value(&self, code: &str, period: NaiveDate, subject: &str) -> Option<f64> {
        self.metric(code, period, subject)?.value
    }

    /// Companies whose level-1 industry is known.
    pub fn stocks_with_industry(&self) -> usize {
        self.companies
            .iter()
            .filter(|c| self.industry(&c.code).is_some_and(|i| i.level1.is_some()))
            .count()
    }

    /// Per period, companies with at least one value for it.
    pub fn stocks_with_period(&self) -> Vec<(NaiveDate, usize)> {
        self.periods
            .iter()
            .map(|period| {
                let count = self
                    .companies
                    .iter()
                    .filter(|c| self.subjects.iter().any(|s| self.value(&c.code, *period, s).is_some()))
                    .count();
                (*period, count)
            })
            .collect()
    }

    /// Exported value cells: (filled, total).
    pub fn cell_fill(&self) -> (usize, usize) {
        let total = self.companies.len() * self.periods.len() * self.subjects.len();
        let filled = self
            .companies
            .iter()
            .map(|c| {
                self.periods
                    .iter()
                    .flat_map(|p| self.subjects.iter().map(move |s| (*p, s)))
                    .filter(|(p, s)| self.value(&c.code, *p, s).is_some())
                    .count()
            })
            .sum();
        (filled, total)
    }

    /// Source names that contributed any exported record.
    pub fn sources(&self) -> Vec<String> {
        let tags = self
            .companies
            .iter()
            .map(|c| c.source.as_str())
            .chain(
                self.companies
                    .iter()
                    .filter_map(|c| self.industry(&c.code))
                    .map(|i| i.source.as_str()),
            )
            .chain(self.companies.iter().flat_map(|c| {
                self.metrics
                    .get(&c.code)
                    .into_iter()
                    .flat_map(|cells| cells.values())
                    .filter(|m| m.value.is_some())
                    .map(|m| m.source.as_str())
            }));

        let names: BTreeSet<&str> = tags
            .flat_map(|tag| tag.split('+'))
            .filter(|name| !name.is_empty())
            .collect();
        names.into_iter().map(String::from).collect()
    }

    /// Re-check the stored companies and values.
    pub fn validation_report(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        for company in &self.companies {
            match validate_company(company) {
                Ok(()) => report.record_valid(),
                Err(issue) => report.record_invalid(&issue),
            }
            let Some(cells) = self.metrics.get(&company.code) else {
                continue;
            };
            for metric in cells.values().filter(|m| m.value.is_some()) {
                match validate_metric(metric) {
                    Ok(()) => report.record_valid(),
                    Err(issue) => report.record_invalid(&issue),
                }
            }
        }
        report
    }

    pub fn quality_inputs(&self, validation: &ValidationReport, collected_on: Option<NaiveDate>) -> QualityInputs {
        QualityInputs {
            total_stocks: self.companies.len(),
            valid_records: validation.valid,
            total_records: validation.total,
            collected_on,
            stocks_with_industry: self.stocks_with_industry(),
            stocks_with_period: self.stocks_with_period(),
        }
    }
}

// ============================================================================
// Export
// ============================================================================

/// Run facts written to the summary and metadata sheets.
#[derive(Debug, Clone)]
pub struct ExportContext {
    pub generated_at: DateTime<Local>,
    pub quality: QualityReport,
    pub validation: ValidationReport,
    pub providers: Vec<ProviderInfo>,
    pub diff: Option<DiffSummary>,
    /// The run was cancelled before every unit was processed
    pub interrupted: bool,
}

/// `{prefix}_{yyyymmdd_HHMMSS}.xlsx`
pub fn export_file_name(prefix: &str, at: DateTime<Local>) -> String {
    format!("{}_{}.xlsx", prefix, at.format("%Y%m%d_%H%M%S"))
}

/// Write the workbook into `output_dir` and return its path.
pub fn export_workbook(
    dataset: &Dataset,
    context: &ExportContext,
    output_dir: &Path,
    prefix: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output dir {}", output_dir.display()))?;

    let path = output_dir.join(export_file_name(prefix, context.generated_at));
    ExcelExporter::new()
        .write(dataset, context, &path)
        .with_context(|| format!("Failed to write workbook {}", path.display()))?;

    info!(
        path = %path.display(),
        companies = dataset.companies.len(),
        "Exported workbook"
    );
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> Dataset {
        let p1 = date(2023, 12, 31);
        let p2 = date(2024, 12, 31);
        Dataset::new(
            vec![
                ListedCompany::new("600000", "浦发银行", "eastmoney"),
                ListedCompany::new("000002", "万科A", "eastmoney+cninfo"),
                ListedCompany::new("600000", "浦发银行", "sina"),
            ],
            vec![IndustryClassification::from_raw_label("000002", "房地产开发", None, "sina")],
            vec![
                FinancialMetric::new("000002", p1, "INVEST_REALESTATE", Some(1.5e10), "eastmoney_f10"),
                FinancialMetric::new("000002", p2, "INVEST_REALESTATE", None, ""),
                FinancialMetric::new("600000", p2, "INVEST_REALESTATE", Some(-1.0), "sina"),
            ],
            vec![p1, p2],
            vec!["INVEST_REALESTATE".to_string()],
        )
    }

    #[test]
    fn test_companies_unique_and_sorted() {
        let dataset = sample();
        let codes: Vec<&str> = dataset.companies.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["000002", "600000"]);
    }

    #[test]
    fn test_coverage_counts() {
        let dataset = sample();
        assert_eq!(dataset.stocks_with_industry(), 1);
        assert_eq!(
            dataset.stocks_with_period(),
            vec![(date(2023, 12, 31), 1), (date(2024, 12, 31), 1)]
        );
        assert_eq!(dataset.cell_fill(), (2, 4));
        assert_eq!(dataset.value("000002", date(2024, 12, 31), "INVEST_REALESTATE"), None);
    }

    #[test]
    fn test_sources_split_joined_tags() {
        assert_eq!(
            sample().sources(),
            vec!["cninfo", "eastmoney", "eastmoney_f10", "sina"]
        );
    }

    #[test]
    fn test_validation_report_flags_negative_value() {
        let report = sample().validation_report();
        assert_eq!(report.invalid, 1);
        assert_eq!(report.valid, 3);
    }

    #[test]
    fn test_export_file_name() {
        let at = Local.with_ymd_and_hms(2024, 7, 1, 9, 5, 3).unwrap();
        assert_eq!(export_file_name("ashare", at), "ashare_20240701_090503.xlsx");
    }
}

//! Deduplication by stock code.

use std::collections::HashSet;
use tracing::debug;

use crate::data::{IndustryClassification, ListedCompany};

/// Records identified by a stock code.
pub trait Coded {
    fn code(&self) -> &str;
}

impl Coded for ListedCompany {
    fn code(&self) -> &str {
        &self.code
    }
}

impl Coded for IndustryClassification {
    fn code(&self) -> &str {
        &self.code
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub before: usize,
    pub after: usize,
}

impl DedupReport {
    pub fn removed(&self) -> usize {
        self.before - self.after
    }
}

/// Keep the first record per code. Callers pass records in priority order.
pub fn dedup_by_code<T: Coded>(records: Vec<T>) -> (Vec<T>, DedupReport) {
    let before = records.len();
    let mut seen = HashSet::with_capacity(before);
    let kept: Vec<T> = records
        .into_iter()
        .filter(|record| seen.insert(record.code().to_string()))
        .collect();

    let report = DedupReport {
        before,
        after: kept.len(),
    };
    debug!(before, after = report.after, removed = report.removed(), "Deduplicated by code");
    (kept, report)
}

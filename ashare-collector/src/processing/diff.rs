//! Incremental comparison of a fresh stock list with the stored one.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::data::ListedCompany;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rename {
    pub code: String,
    pub old_name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct StockDiff {
    pub added: Vec<ListedCompany>,
    pub removed: Vec<ListedCompany>,
    pub renamed: Vec<Rename>,
    pub unchanged: usize,
}

/// Counts recorded in the version log
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub total: usize,
    pub added: usize,
    pub removed: usize,
    pub renamed: usize,
    pub unchanged: usize,
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} stocks: +{} new, -{} delisted, {} renamed, {} unchanged",
            self.total, self.added, self.removed, self.renamed, self.unchanged
        )
    }
}

impl StockDiff {
    /// Compare lists by code. Results are ordered by code.
    pub fn compute(previous: &[ListedCompany], current: &[ListedCompany]) -> Self {
        let before: HashMap<&str, &ListedCompany> =
            previous.iter().map(|c| (c.code.as_str(), c)).collect();
        let after: HashMap<&str, &ListedCompany> =
            current.iter().map(|c| (c.code.as_str(), c)).collect();

        let mut diff = StockDiff::default();
        for company in current {
            match before.get(company.code.as_str()) {
                None => diff.added.push(company.clone()),
                Some(old) if old.name != company.name => diff.renamed.push(Rename {
                    code: company.code.clone(),
                    old_name: old.name.clone(),
                    new_name: company.name.clone(),
                }),
                Some(_) => diff.unchanged += 1,
            }
        }
        diff.removed = previous
            .iter()
            .filter(|c| !after.contains_key(c.code.as_str()))
            .cloned()
            .collect();

        diff.added.sort_by(|a, b| a.code.cmp(&b.code));
        diff.removed.sort_by(|a, b| a.code.cmp(&b.code));
        diff.renamed.sort_by(|a, b| a.code.cmp(&b.code));
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.renamed.is_empty()
    }

    pub fn removed_codes(&self) -> Vec<String> {
        self.removed.iter().map(|c| c.code.clone()).collect()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            total: self.added.len() + self.renamed.len() + self.unchanged,
            added: self.added.len(),
            removed: self.removed.len(),
            renamed: self.renamed.len(),
            unchanged: self.unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company(code: &str, name: &str) -> ListedCompany {
        ListedCompany::new(code, name, "eastmoney")
    }

    #[test]
    fn test_compute_diff() {
        let previous = vec![
            company("600000", "浦发银行"),
            company("000002", "万科A"),
            company("600001", "邯郸钢铁"),
        ];
        let current = vec![
            company("000002", "万  科A"),
            company("600000", "浦发银行"),
            company("688981", "中芯国际"),
            company("300750", "宁德时代"),
        ];

        let diff = StockDiff::compute(&previous, &current);
        assert_eq!(diff.added.len(), 2);
        assert_eq!(diff.added[0].code, "300750");
        assert_eq!(diff.removed_codes(), vec!["600001".to_string()]);
        assert_eq!(diff.renamed.len(), 1);
        assert_eq!(diff.renamed[0].old_name, "万科A");
        assert_eq!(diff.unchanged, 1);
        assert!(!diff.is_empty());

        let summary = diff.summary();
        assert_eq!(summary.total, 4);
        assert_eq!(summary.to_string(), "4 stocks: +2 new, -1 delisted, 1 renamed, 1 unchanged");
    }

    #[test]
    fn test_first_run_is_all_new() {
        let current = vec![company("600000", "浦发银行")];
        let diff = StockDiff::compute(&[], &current);
        assert_eq!(diff.summary().added, 1);
        assert_eq!(diff.summary().removed, 0);
    }
}

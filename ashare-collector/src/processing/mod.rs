//! Validation, cleaning, deduplication, priority merge, quality scoring and
//! stock-list diffing.

pub mod cleaner;
pub mod dedup;
pub mod diff;
pub mod merge;
pub mod quality;
pub mod shenwan;
pub mod validator;

pub use dedup::{dedup_by_code, DedupReport};
pub use diff::{DiffSummary, Rename, StockDiff};
pub use merge::{merge_industry, merge_metrics, merge_stock_lists, Merged, Provenance};
pub use quality::{assess, Grade, QualityInputs, QualityReport};
pub use shenwan::{infer_level1, SHENWAN_LEVEL1};
pub use validator::{ValidationIssue, ValidationReport};

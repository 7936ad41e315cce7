//! Ashare Collector Library
//!
//! Collects A-share listed companies, their industry classification and
//! balance-sheet values from several public sources, merges them by source
//! priority, and exports the result to a multi-sheet workbook.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                      CollectorPipeline                            │
//! │   stock list → industries → financials → quality → export         │
//! ├──────────────────┬───────────────────┬─────────────────────────────┤
//! │  data            │  processing       │  storage                    │
//! │  sources, router │  clean, validate, │  SQLite cache, checkpoints, │
//! │  retry/failover  │  dedup, merge     │  CSV/JSON backups           │
//! └──────────────────┴───────────────────┴─────────────────────────────┘
//! ```
//!
//! # Key Concepts
//!
//! ## Priority merge
//! - Each source has a priority (lower wins)
//! - Field by field, the highest-priority non-null value is kept
//! - Fields no source reported stay null
//!
//! ## Resume
//! - Results are stored per code as soon as they are merged
//! - A resumed run skips codes with a stored row and only adds data

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod data;
pub mod export;
pub mod pipeline;
pub mod processing;
pub mod storage;

pub use data::{DataProviderRouter, FinancialMetric, IndustryClassification, ListedCompany, Market};
pub use pipeline::{CollectorPipeline, RunOptions, RunSummary};

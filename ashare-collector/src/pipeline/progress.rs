//! Stage progress tracking.

use std::time::{Duration, Instant};
use tracing::info;

use crate::storage::CheckpointProgress;

/// Counts completed and failed units of one stage and logs every
/// `log_interval` units with throughput and ETA.
#[derive(Debug)]
pub struct ProgressTracker {
    stage: &'static str,
    total: usize,
    log_interval: usize,
    completed: usize,
    failed: usize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(stage: &'static str, total: usize, log_interval: usize) -> Self {
        Self {
            stage,
            total,
            log_interval: log_interval.max(1),
            completed: 0,
            failed: 0,
            started: Instant::now(),
        }
    }

    pub fn record_success(&mut self) {
        self.completed += 1;
        self.maybe_log();
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
        self.maybe_log();
    }

    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    /// Units per second since the tracker was created.
    pub fn rate(&self) -> f64 {
        let secs = self.started.elapsed().as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.processed() as f64 / secs
        }
    }

    /// Estimated time until every unit is processed.
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.rate();
        if rate <= 0.0 {
            return None;
        }
        let remaining = self.total.saturating_sub(self.processed());
        Some(Duration::from_secs_f64(remaining as f64 / rate))
    }

    pub fn snapshot(&self) -> CheckpointProgress {
        CheckpointProgress {
            completed: self.completed,
            failed: self.failed,
            total: self.total,
        }
    }

    fn maybe_log(&self) {
        let processed = self.processed();
        if processed % self.log_interval == 0 || processed == self.total {
            self.log();
        }
    }

    pub fn log(&self) {
        let percent = if self.total == 0 {
            100.0
        } else {
            self.processed() as f64 / self.total as f64 * 100.0
        };
        info!(
            stage = self.stage,
            processed = self.processed(),
            total = self.total,
            failed = self.failed,
            rate_per_sec = (self.rate() * 100.0).round() / 100.0,
            eta_secs = self.eta().map(|d| d.as_secs()),
            "Progress {:.1}%",
            percent
        );
    }
}

//! Bounded worker pool with cooperative cancellation.

use futures::stream::{self, StreamExt};
use std::future::{ready, Future};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Counts from one pool run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    pub total: usize,
    /// Units that ran to completion
    pub processed: usize,
    /// Units never started because the run was cancelled
    pub skipped: usize,
    pub cancelled: bool,
}

/// Runs units of work `max_workers` at a time.
///
/// The cancellation token is checked before each unit is started. Units
/// already in flight when it fires run to completion.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_workers: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(max_workers: usize, cancel: CancellationToken) -> Self {
        Self {
            max_workers: max_workers.max(1),
            cancel,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run `work` over `units`, handing each result to `on_result` as it
    /// completes. Completion order is not input order.
    pub async fn run<T, R, F, Fut, H>(&self, units: Vec<T>, work: F, mut on_result: H) -> PoolOutcome
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
        H: FnMut(R),
    {
        let total = units.len();
        let cancel = &self.cancel;

        let mut results = stream::iter(units)
            .take_while(|_| ready(!cancel.is_cancelled()))
            .map(&work)
            .buffer_unordered(self.max_workers);

        let mut processed = 0;
        while let Some(result) = results.next().await {
            processed += 1;
            on_result(result);
        }

        let cancelled = cancel.is_cancelled();
        if cancelled && processed < total {
            warn!(processed, skipped = total - processed, "Worker pool stopped early");
        }

        PoolOutcome {
            total,
            processed,
            skipped: total - processed,
            cancelled,
        }
    }
}

/// Cancel `token` on the first Ctrl-C.
///
/// The listener exits quietly once the token is cancelled by anyone else.
pub fn cancel_on_ctrl_c(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("Interrupt received, finishing in-flight work");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C"),
            },
            _ = token.cancelled() => {}
        }
    })
}

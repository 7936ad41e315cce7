//! Request pacing for a single data source.
//!
//! Two layers are combined:
//! - [`RateLimiter`]: token bucket holding a source to its per-minute budget
//! - [`RequestPacer`]: randomized gap between consecutive requests, plus
//!   the optional token bucket

use rand::Rng;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

// ============================================================================
// Token Bucket
// ============================================================================

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket rate limiter.
///
/// Holds at most one second's worth of requests and refills continuously.
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    capacity: f64,
    /// Tokens added per second
    refill_per_sec: f64,
    bucket: StdMutex<Bucket>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1) as f64;
        let capacity = (rpm / 60.0).ceil().max(1.0);
        Self {
            name: name.into(),
            capacity,
            refill_per_sec: rpm / 60.0,
            bucket: StdMutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take a token; on failure returns how long until one is available.
    fn take(&self) -> Result<(), Duration> {
        let mut bucket = match self.bucket.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let missing = 1.0 - bucket.tokens;
            Err(Duration::from_secs_f64(missing / self.refill_per_sec))
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Acquire a token, waiting if necessary.
    pub async fn acquire(&self) {
        while let Err(wait) = self.take() {
            let wait = wait.clamp(Duration::from_millis(10), Duration::from_secs(5));
            debug!(
                limiter = %self.name,
                wait_ms = wait.as_millis() as u64,
                "Rate limited, waiting for token"
            );
            tokio::time::sleep(wait).await;
        }
    }

    /// Whole tokens currently available (without refilling)
    pub fn available_tokens(&self) -> u32 {
        match self.bucket.lock() {
            Ok(bucket) => bucket.tokens.floor() as u32,
            Err(poisoned) => poisoned.into_inner().tokens.floor() as u32,
        }
    }
}

// ============================================================================
// Request Pacer
// ============================================================================

/// Spaces out requests to one source with a random gap in
/// `[min_delay, max_delay]`.
///
/// Callers queue on an async mutex, so concurrent workers hitting the same
/// source are serialized while different sources proceed in parallel.
#[derive(Debug)]
pub struct RequestPacer {
    name: String,
    min_delay: Duration,
    max_delay: Duration,
    next_allowed: Mutex<Option<Instant>>,
    limiter: Option<RateLimiter>,
}

impl RequestPacer {
    pub fn new(name: impl Into<String>, min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };
        Self {
            name: name.into(),
            min_delay,
            max_delay,
            next_allowed: Mutex::new(None),
            limiter: None,
        }
    }

    /// A pacer that never waits
    pub fn unpaced(name: impl Into<String>) -> Self {
        Self::new(name, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_rate_limit(mut self, requests_per_minute: Option<u32>) -> Self {
        self.limiter = requests_per_minute.map(|rpm| RateLimiter::new(self.name.clone(), rpm));
        self
    }

    /// Draw the next gap.
    pub fn random_delay(&self) -> Duration {
        if self.max_delay == self.min_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }

    /// Wait until the next request to this source may be sent.
    pub async fn wait(&self) {
        {
            let mut next_allowed = self.next_allowed.lock().await;
            if let Some(at) = *next_allowed {
                let now = Instant::now();
                if at > now {
                    tokio::time::sleep(at - now).await;
                }
            }
            *next_allowed = Some(Instant::now() + self.random_delay());
        }

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

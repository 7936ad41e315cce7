//! Rotating User-Agent pool.

use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Browser identities rotated across requests when none are configured.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36 Edg/122.0.0.0",
];

/// Picks a random User-Agent per request, never the same one twice in a row.
#[derive(Debug)]
pub struct UserAgentPool {
    agents: Vec<String>,
    last: AtomicUsize,
}

impl UserAgentPool {
    /// Build a pool from configured agents, falling back to the built-in list.
    pub fn new(agents: &[String]) -> Self {
        let agents: Vec<String> = agents
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty())
            .map(String::from)
            .collect();

        let agents = if agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|a| a.to_string()).collect()
        } else {
            agents
        };

        Self {
            agents,
            last: AtomicUsize::new(usize::MAX),
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn next(&self) -> &str {
        if self.agents.len() == 1 {
            return &self.agents[0];
        }

        let last = self.last.load(Ordering::Relaxed);
        let mut rng = rand::thread_rng();
        let mut idx = rng.gen_range(0..self.agents.len());
        if idx == last {
            idx = (idx + 1) % self.agents.len();
        }
        self.last.store(idx, Ordering::Relaxed);
        &self.agents[idx]
    }
}

impl Default for UserAgentPool {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pool() {
        let pool = UserAgentPool::default();
        assert_eq!(pool.len(), DEFAULT_USER_AGENTS.len());
        assert!(pool.next().starts_with("Mozilla/5.0"));
    }

    #[test]
    fn test_blank_entries_fall_back_to_defaults() {
        let pool = UserAgentPool::new(&["  ".to_string()]);
        assert_eq!(pool.len(), DEFAULT_USER_AGENTS.len());
    }

    #[test]
    fn test_never_repeats_consecutively() {
        let pool = UserAgentPool::new(&["a".into(), "b".into(), "c".into()]);
        let mut prev = pool.next().to_string();
        for _ in 0..500 {
            let current = pool.next().to_string();
            assert_ne!(current, prev);
            prev = current;
        }
    }

    #[test]
    fn test_single_agent() {
        let pool = UserAgentPool::new(&["only".into()]);
        assert_eq!(pool.next(), "only");
        assert_eq!(pool.next(), "only");
    }
}

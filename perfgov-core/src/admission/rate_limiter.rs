//! # Rate Limiter
//!
//! Sliding-window rate limiter keyed by client identity.
//!
//! ## Features
//!
//! - Per-key trailing window of request timestamps
//! - Stale timestamps purged on every check
//! - Retry hint on rejection (time until the oldest request leaves the window)
//! - Idle keys dropped by the background sweeper
//!
//! ## Usage
//!
//! ```rust
//! use perfgov_core::admission::RateLimiter;
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new();
//! let window = Duration::from_secs(60);
//!
//! assert!(limiter.check("10.0.0.1", 2, window).is_ok());
//! assert!(limiter.check("10.0.0.1", 2, window).is_ok());
//! assert!(limiter.check("10.0.0.1", 2, window).is_err());
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use crate::clock::deadline_after;
use crate::error::{GovernorError, Result};

/// Request timestamps of one key, ascending
#[derive(Debug)]
struct RateWindow {
    stamps: VecDeque<Instant>,
    /// Window length used by the last check, so the sweeper knows what
    /// "stale" means for this key
    window: Duration,
}

impl RateWindow {
    fn new(window: Duration) -> Self {
        Self {
            stamps: VecDeque::new(),
            window,
        }
    }

    /// Drop timestamps that are `window` or more in the past
    fn purge(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.saturating_duration_since(*oldest) < self.window {
                break;
            }
            self.stamps.pop_front();
        }
    }

    fn retry_after(&self, now: Instant) -> Duration {
        match self.stamps.front() {
            Some(oldest) => deadline_after(*oldest, self.window).saturating_duration_since(now),
            None => self.window,
        }
    }
}

/// Sliding-window rate limiter
#[derive(Debug, Default)]
pub struct RateLimiter {
    /// Windows keyed by client identity
    windows: DashMap<String, RateWindow>,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request for `key`, or fail with `RateLimitExceeded` if
    /// `max_requests` requests already happened within the trailing `window`
    pub fn check(&self, key: &str, max_requests: usize, window: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateWindow::new(window));

        entry.window = window;
        entry.purge(now);

        if entry.stamps.len() >= max_requests {
            let retry_after = entry.retry_after(now);
            drop(entry);
            debug!(
                "Rate limit exceeded for {} ({} requests per {:?})",
                key, max_requests, window
            );
            return Err(GovernorError::rate_limited(key, retry_after));
        }

        entry.stamps.push_back(now);
        Ok(())
    }

    /// Requests left for `key` in the current window, without recording one
    pub fn remaining(&self, key: &str, max_requests: usize, window: Duration) -> usize {
        let now = Instant::now();
        let used = self.windows.get(key).map_or(0, |entry| {
            entry
                .stamps
                .iter()
                .filter(|ts| now.saturating_duration_since(**ts) < window)
                .count()
        });
        max_requests.saturating_sub(used)
    }

    /// Drop keys whose window no longer holds any request
    pub fn purge_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, entry| {
            entry.purge(now);
            !entry.stamps.is_empty()
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of keys currently tracked (for monitoring)
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Forget every key
    pub fn clear(&self) {
        self.windows.clear();
    }
}

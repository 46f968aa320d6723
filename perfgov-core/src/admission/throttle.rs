//! # Throttle
//!
//! Coalesces near-simultaneous triggers for the same logical key into one
//! wrapped function per window.
//!
//! The first `throttle` call for a key registers a slot that lives for
//! `delay`. Calls within that window get the same wrapper back (the
//! function passed to later calls is ignored). Invoking the wrapper releases
//! the slot, so the next `throttle` call starts a new window. Only one
//! wrapper is live per key at a time; burst callers share it rather than
//! each running their own function.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::time::Instant;

use crate::clock::deadline_after;

type WrappedFn<T> = Arc<dyn Fn() -> T + Send + Sync>;

struct ThrottleSlot<T> {
    id: u64,
    expires_at: Instant,
    f: WrappedFn<T>,
}

/// Per-key throttle slots
pub struct Throttle<T = Value> {
    slots: Arc<DashMap<String, ThrottleSlot<T>>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl<T> std::fmt::Debug for Throttle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("slots", &self.slots.len())
            .finish()
    }
}

impl<T> Default for Throttle<T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            next_id: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl<T> Throttle<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the live wrapper for `key`, registering `f` if there is none
    pub fn throttle<F>(&self, key: &str, f: F, delay: Duration) -> ThrottledFn<T>
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let now = Instant::now();
        let wrapped: WrappedFn<T> = Arc::new(f);
        let mut slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| self.new_slot(wrapped.clone(), now, delay));

        // A slot whose window has passed is replaced, not reused
        if slot.expires_at <= now {
            *slot = self.new_slot(wrapped, now, delay);
        }

        ThrottledFn {
            key: key.to_string(),
            id: slot.id,
            f: slot.f.clone(),
            slots: Arc::clone(&self.slots),
        }
    }

    fn new_slot(&self, f: WrappedFn<T>, now: Instant, delay: Duration) -> ThrottleSlot<T> {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        ThrottleSlot {
            id,
            expires_at: deadline_after(now, delay),
            f,
        }
    }

    /// Drop slots whose window has passed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.expires_at > now);
        before.saturating_sub(self.slots.len())
    }

    /// Whether `key` currently has a live slot
    pub fn is_throttled(&self, key: &str) -> bool {
        let now = Instant::now();
        self.slots
            .get(key)
            .map_or(false, |slot| slot.expires_at > now)
    }

    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&self) {
        self.slots.clear();
    }
}

/// Wrapper handed out by [`Throttle::throttle`]
pub struct ThrottledFn<T> {
    key: String,
    id: u64,
    f: WrappedFn<T>,
    slots: Arc<DashMap<String, ThrottleSlot<T>>>,
}

impl<T> Clone for ThrottledFn<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            id: self.id,
            f: self.f.clone(),
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T> std::fmt::Debug for ThrottledFn<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottledFn")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

impl<T> ThrottledFn<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the slot (only if it is still this wrapper's) and run the
    /// wrapped function
    pub fn call(&self) -> T {
        self.slots.remove_if(&self.key, |_, slot| slot.id == self.id);
        (self.f)()
    }

    /// Whether two wrappers belong to the same slot
    pub fn same_slot(&self, other: &ThrottledFn<T>) -> bool {
        self.key == other.key && self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DELAY: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_burst_shares_one_wrapper() {
        let throttle: Throttle<usize> = Throttle::new();

        let first = throttle.throttle("/api/analytics/overview", || 1, DELAY);
        let second = throttle.throttle("/api/analytics/overview", || 2, DELAY);

        assert!(first.same_slot(&second));
        assert_eq!(second.call(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_window_after_expiry() {
        let throttle: Throttle<usize> = Throttle::new();

        let first = throttle.throttle("k", || 1, DELAY);
        tokio::time::sleep(DELAY).await;
        let second = throttle.throttle("k", || 2, DELAY);

        assert!(!first.same_slot(&second));
        assert_eq!(second.call(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_releases_slot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let throttle: Throttle<Value> = Throttle::new();

        let counter = calls.clone();
        let wrapped = throttle.throttle(
            "k",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                json!({"ok": true})
            },
            DELAY,
        );
        assert!(throttle.is_throttled("k"));

        assert_eq!(wrapped.call(), json!({"ok": true}));
        assert!(!throttle.is_throttled("k"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_wrapper_does_not_release_new_slot() {
        let throttle: Throttle<usize> = Throttle::new();

        let old = throttle.throttle("k", || 1, DELAY);
        tokio::time::sleep(DELAY).await;
        let _new = throttle.throttle("k", || 2, DELAY);

        assert_eq!(old.call(), 1);
        assert!(throttle.is_throttled("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_delay_keeps_slot() {
        let throttle: Throttle<usize> = Throttle::new();
        let first = throttle.throttle("k", || 1, Duration::MAX);
        tokio::time::sleep(Duration::from_secs(3600)).await;

        assert!(throttle.is_throttled("k"));
        assert_eq!(throttle.purge_expired(), 0);
        assert!(first.same_slot(&throttle.throttle("k", || 2, Duration::MAX)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let throttle: Throttle<()> = Throttle::new();
        throttle.throttle("a", || (), DELAY);
        throttle.throttle("b", || (), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(throttle.purge_expired(), 1);
        assert_eq!(throttle.active_slots(), 1);
    }
}

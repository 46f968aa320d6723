//! Bounded memoization and single-load lazy values.
//!
//! [`Memoizer`] keeps at most `capacity` results and evicts the oldest
//! insertion first; hits do not refresh an entry. It implements
//! [`Reclaimable`] so a [`ResourceGovernor`](super::ResourceGovernor) can
//! drop memoized results under memory pressure.
//!
//! [`LazyLoader`] runs its loader at most once at a time. Concurrent callers
//! wait for the load in progress; a failed load is not cached.

use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;

use futures::future::{BoxFuture, FutureExt};
use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use super::governor::Reclaimable;
use crate::error::Result;

pub struct Memoizer<K: Hash + Eq, V> {
    name: String,
    entries: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V> std::fmt::Debug for Memoizer<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoizer")
            .field("name", &self.name)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl<K: Hash + Eq, V: Clone> Memoizer<K, V> {
    /// Memoizer holding at most `capacity` results (at least one)
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            name: name.into(),
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Memoized result for `key`, calling `compute` on a miss
    ///
    /// `compute` runs without the lock held, so two racing misses for the
    /// same key may both compute; the later result wins.
    pub fn get_or_compute<F>(&self, key: K, compute: F) -> V
    where
        F: FnOnce(&K) -> V,
    {
        if let Some(value) = self.entries.lock().peek(&key) {
            return value.clone();
        }

        let value = compute(&key);
        self.entries.lock().push(key, value.clone());
        value
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl<K, V> Reclaimable for Memoizer<K, V>
where
    K: Hash + Eq + Send,
    V: Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn reclaim(&self) -> usize {
        let mut entries = self.entries.lock();
        let dropped = entries.len();
        entries.clear();
        dropped
    }
}

type LoadFn<T> = Box<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// Value loaded on first use
pub struct LazyLoader<T> {
    key: String,
    cell: OnceCell<T>,
    load: LoadFn<T>,
}

impl<T> std::fmt::Debug for LazyLoader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyLoader")
            .field("key", &self.key)
            .field("loaded", &self.cell.initialized())
            .finish()
    }
}

impl<T> LazyLoader<T> {
    pub fn new<F, Fut>(key: impl Into<String>, load: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            key: key.into(),
            cell: OnceCell::new(),
            load: Box::new(move || load().boxed()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loaded value, loading it first if needed
    pub async fn get(&self) -> Result<&T> {
        self.cell
            .get_or_try_init(|| {
                debug!("Lazy loading '{}'", self.key);
                (self.load)()
            })
            .await
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

//! Bounded retention cache for large, recomputable objects.
//!
//! Least-recently-used entries are evicted once `capacity` is reached. A
//! miss is indistinguishable from "never stored", so callers must be able
//! to recompute whatever they keep here.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

#[derive(Debug)]
pub struct RetentionCache<V> {
    inner: Mutex<LruCache<String, V>>,
}

impl<V: Clone> RetentionCache<V> {
    /// Create a cache holding at most `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// Store `value`, returning the entry evicted to make room, if any
    pub fn insert(&self, key: impl Into<String>, value: V) -> Option<(String, V)> {
        let key = key.into();
        let mut inner = self.inner.lock();
        match inner.push(key.clone(), value) {
            // push hands back the old value when the key was already present
            Some((evicted, _)) if evicted == key => None,
            other => other,
        }
    }

    /// Look up `key`, marking it as recently used
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<V> {
        self.inner.lock().pop(key)
    }

    /// Evict least-recently-used entries until at most `residual` remain
    pub fn trim_to(&self, residual: usize) -> usize {
        let mut inner = self.inner.lock();
        let mut evicted = 0;
        while inner.len() > residual {
            if inner.pop_lru().is_none() {
                break;
            }
            evicted += 1;
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().cap().get()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

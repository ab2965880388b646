//! Bounded least-recently-used cache.

use std::hash::Hash;
use std::num::NonZeroUsize;

/// Fixed-capacity LRU map over [`lru::LruCache`]. Capacity 0 stores nothing.
#[derive(Debug)]
pub struct LruCache<K: Hash + Eq, V> {
    inner: Option<lru::LruCache<K, V>>,
}

impl<K: Hash + Eq, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: NonZeroUsize::new(capacity).map(lru::LruCache::new),
        }
    }

    /// Look up and promote to most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.as_mut()?.get(key)
    }

    /// Insert or replace; a full cache drops its least recently used entry.
    pub fn put(&mut self, key: K, value: V) {
        if let Some(inner) = self.inner.as_mut() {
            inner.put(key, value);
        }
    }

    /// Membership test without promotion.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.contains(key))
    }

    pub fn len(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.as_ref().map_or(0, |inner| inner.cap().get())
    }

    pub fn clear(&mut self) {
        if let Some(inner) = self.inner.as_mut() {
            inner.clear();
        }
    }
}

//! Bounded, TTL-aware cache shared across requests.
//!
//! Backs both the classifier cache and the agent instance pool. Capacity is
//! enforced with LRU eviction; entries older than the TTL are treated as
//! absent and dropped on access.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::Mutex;

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Mutex-guarded LRU map with a per-entry time-to-live.
pub struct BoundedCache<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, Entry<V>>>,
    ttl: Option<Duration>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// `capacity` of zero is bumped to one.
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;
        let expired = match inner.get(key) {
            Some(entry) => self
                .ttl
                .is_some_and(|ttl| entry.inserted_at.elapsed() >= ttl),
            None => return None,
        };
        if expired {
            inner.pop(key);
            return None;
        }
        inner.get(key).map(|entry| entry.value.clone())
    }

    pub async fn insert(&self, key: K, value: V) {
        self.inner.lock().await.put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Return the cached value, or insert the one produced by `make`.
    pub async fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.get(&key) {
            let fresh = self
                .ttl
                .is_none_or(|ttl| entry.inserted_at.elapsed() < ttl);
            if fresh {
                return entry.value.clone();
            }
        }
        let value = make();
        inner.put(
            key,
            Entry {
                value: value.clone(),
                inserted_at: Instant::now(),
            },
        );
        value
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().await.pop(key).map(|entry| entry.value)
    }

    /// Drop every entry whose key matches `pred`. Returns how many went.
    pub async fn remove_where(&self, pred: impl Fn(&K) -> bool) -> usize
    where
        K: Clone,
    {
        let mut inner = self.inner.lock().await;
        let doomed: Vec<K> = inner
            .iter()
            .filter(|(key, _)| pred(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            inner.pop(key);
        }
        doomed.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

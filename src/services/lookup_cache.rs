//! Bounded TTL cache of file lookups (file ID or content hash → download URL).

use lru::LruCache;
use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

#[derive(Clone, Debug)]
struct CachedUrl {
    url: String,
    inserted_at: Instant,
}

/// Capacity-bounded LRU whose entries also expire after a fixed TTL.
///
/// Expired entries are dropped on access and by [`LookupCache::purge_expired`].
#[derive(Clone)]
pub struct LookupCache {
    inner: Arc<Mutex<LruCache<String, CachedUrl>>>,
    ttl: Duration,
}

impl LookupCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<String> {
        let mut cache = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let expired = match cache.get(key) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                return Some(entry.url.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            cache.pop(key);
        }
        None
    }

    pub fn insert(&self, key: impl Into<String>, url: impl Into<String>) {
        let mut cache = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        cache.put(
            key.into(),
            CachedUrl {
                url: url.into(),
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &str) {
        let mut cache = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        cache.pop(key);
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut cache = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let stale: Vec<String> = cache
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.inserted_at) >= self.ttl)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &stale {
            cache.pop(key);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

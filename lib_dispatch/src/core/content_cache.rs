//! # Content Cache
//!
//! A small TTL + size-bounded map keyed by content key. Used twice: once for
//! job results and once for fetched assets.
//!
//! Expiry is lazy: expired entries are dropped whenever the cache is touched.
//! When the size bound is hit, the oldest-inserted entry goes first. A
//! re-insert of an existing key counts as a fresh insertion.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::utils::lock;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    payload: V,
    updated_at: Instant,
    seq: u64,
}

#[derive(Debug)]
struct CacheInner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    // (key, seq) in insertion order; entries whose seq no longer matches are stale.
    order: VecDeque<(String, u64)>,
    next_seq: u64,
}

#[derive(Debug)]
pub struct ContentCache<V> {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<CacheInner<V>>,
}

impl<V: Clone> ContentCache<V> {
    /// `max_entries == 0` disables the size bound.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            inner: Mutex::new(CacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_seq: 0,
            }),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut inner = lock(&self.inner);
        self.prune(&mut inner, Instant::now());
        inner.entries.get(key).map(|e| e.payload.clone())
    }

    pub fn put(&self, key: impl Into<String>, payload: V) {
        let key = key.into();
        let now = Instant::now();
        let mut inner = lock(&self.inner);
        self.prune(&mut inner, now);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                payload,
                updated_at: now,
                seq,
            },
        );
        inner.order.push_back((key, seq));

        if self.max_entries > 0 {
            while inner.entries.len() > self.max_entries {
                let Some((oldest, seq)) = inner.order.pop_front() else {
                    break;
                };
                if inner.entries.get(&oldest).is_some_and(|e| e.seq == seq) {
                    inner.entries.remove(&oldest);
                }
            }
        }

        // Re-puts behind a live front entry leave stale tuples prune cannot reach.
        if inner.order.len() > 2 * inner.entries.len() {
            let CacheInner { entries, order, .. } = &mut *inner;
            order.retain(|(key, seq)| entries.get(key).is_some_and(|e| e.seq == *seq));
        }
    }

    pub fn len(&self) -> usize {
        let mut inner = lock(&self.inner);
        self.prune(&mut inner, Instant::now());
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = lock(&self.inner);
        inner.entries.clear();
        inner.order.clear();
    }

    // Insertion order equals age order, so expired and stale entries sit at the front.
    fn prune(&self, inner: &mut CacheInner<V>, now: Instant) {
        loop {
            let expired = match inner.order.front() {
                None => break,
                Some((key, seq)) => match inner.entries.get(key) {
                    Some(entry) if entry.seq == *seq => {
                        if now.duration_since(entry.updated_at) < self.ttl {
                            break;
                        }
                        true
                    }
                    _ => false,
                },
            };
            if let Some((key, _)) = inner.order.pop_front() {
                if expired {
                    inner.entries.remove(&key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ContentCache::new(Duration::from_secs(10), 8);
        cache.put("a/1.png", 1);
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("a/1.png"), Some(1));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(cache.get("a/1.png"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_inserted_is_evicted_first() {
        let cache = ContentCache::new(Duration::from_secs(60), 2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.put("c", 3);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(10));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_reinserts_keep_the_order_queue_compact() {
        let cache = ContentCache::new(Duration::from_secs(60), 0);
        cache.put("front", 0);
        for i in 0..1_000 {
            cache.put("hot", i);
        }

        assert!(lock(&cache.inner).order.len() <= 4);
        assert_eq!(cache.get("front"), Some(0));
        assert_eq!(cache.get("hot"), Some(999));

        // Age order survives compaction.
        tokio::time::advance(Duration::from_secs(60)).await;
        cache.put("late", 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("late"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn reinsert_refreshes_ttl() {
        let cache = ContentCache::new(Duration::from_secs(10), 0);
        cache.put("k", "old");
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put("k", "new");
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("k"), Some("new"));
    }
}

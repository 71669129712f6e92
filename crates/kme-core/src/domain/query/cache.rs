//! Frequent-query cache
//!
//! Holds candidate lists keyed by normalized query text in an LRU of fixed
//! capacity. Entries expire after the TTL and remember the index generation
//! that produced them; a lookup under any other generation or past the TTL
//! drops the entry and is a miss.

use lru::LruCache;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::Candidate;

struct CachedQuery {
    generation: u64,
    inserted_at: Instant,
    candidates: Arc<Vec<Candidate>>,
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    /// Entries pushed out by capacity
    pub evictions: u64,
    /// Entries dropped for age or generation
    pub expired: u64,
}

pub struct QueryCache {
    ttl: Duration,
    entries: LruCache<String, CachedQuery>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expired: u64,
}

impl fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("capacity", &self.entries.cap())
            .field("ttl", &self.ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

impl QueryCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            ttl,
            entries: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
            hits: 0,
            misses: 0,
            evictions: 0,
            expired: 0,
        }
    }

    /// Cached candidates for `key` built by `generation`
    pub fn get(&mut self, key: &str, generation: u64, now: Instant) -> Option<Arc<Vec<Candidate>>> {
        let ttl = self.ttl;
        let lookup = self.entries.get(key).map(|cached| {
            (cached.generation == generation && now.duration_since(cached.inserted_at) < ttl)
                .then(|| Arc::clone(&cached.candidates))
        });
        let fresh = match lookup {
            Some(Some(candidates)) => Some(candidates),
            Some(None) => {
                self.entries.pop(key);
                self.expired += 1;
                None
            }
            None => None,
        };

        if fresh.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        fresh
    }

    pub fn insert(&mut self, key: String, generation: u64, candidates: Arc<Vec<Candidate>>, now: Instant) {
        let cached = CachedQuery {
            generation,
            inserted_at: now,
            candidates,
        };
        if let Some((displaced, _)) = self.entries.push(key.clone(), cached) {
            if displaced != key {
                self.evictions += 1;
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            expired: self.expired,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Arc<Vec<Candidate>> {
        Arc::new(Vec::new())
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = QueryCache::new(10, Duration::from_secs(3600));
        let now = Instant::now();

        assert!(cache.get("battery", 1, now).is_none());
        cache.insert("battery".into(), 1, candidates(), now);
        assert!(cache.get("battery", 1, now).is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_ttl_expiry() {
        let mut cache = QueryCache::new(10, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert("battery".into(), 1, candidates(), now);

        assert!(cache.get("battery", 1, now + Duration::from_secs(59)).is_some());
        assert!(cache.get("battery", 1, now + Duration::from_secs(61)).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().expired, 1);
    }

    #[test]
    fn test_other_generation_is_a_miss() {
        let mut cache = QueryCache::new(10, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert("battery".into(), 1, candidates(), now);
        assert!(cache.get("battery", 2, now).is_none());
        // dropped, so the old generation misses too
        assert!(cache.get("battery", 1, now).is_none());
    }

    #[test]
    fn test_reinsert_same_key_is_not_an_eviction() {
        let mut cache = QueryCache::new(1, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert("battery".into(), 1, candidates(), now);
        cache.insert("battery".into(), 2, candidates(), now);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
        assert!(cache.get("battery", 2, now).is_some());
    }

    #[test]
    fn test_zero_capacity_holds_one_entry() {
        let mut cache = QueryCache::new(0, Duration::from_secs(60));
        let now = Instant::now();
        cache.insert("a".into(), 1, candidates(), now);
        cache.insert("b".into(), 1, candidates(), now);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("b", 1, now).is_some());
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = QueryCache::new(2, Duration::from_secs(3600));
        let t0 = Instant::now();
        cache.insert("a".into(), 1, candidates(), t0);
        cache.insert("b".into(), 1, candidates(), t0 + Duration::from_secs(1));
        // touching "a" makes "b" the least recently used
        cache.get("a", 1, t0 + Duration::from_secs(2));
        cache.insert("c".into(), 1, candidates(), t0 + Duration::from_secs(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("b", 1, t0 + Duration::from_secs(4)).is_none());
        assert!(cache.get("a", 1, t0 + Duration::from_secs(4)).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }
}

//! Time-bounded set of operation hashes already taken from the mempool.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Hash set whose entries expire after a fixed TTL.
///
/// Expired entries are dropped lazily on lookup and by [`purge_expired`](Self::purge_expired).
#[derive(Debug)]
pub struct DedupCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    /// Create a cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        // The map stays consistent even if a holder panicked.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether `hash` was set and has not expired.
    pub fn has(&self, hash: &str) -> bool {
        let mut entries = self.entries();
        match entries.get(hash) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                entries.remove(hash);
                false
            }
            None => false,
        }
    }

    /// Remember `hash` for one TTL from now.
    pub fn set(&self, hash: &str) {
        let expiry = Instant::now() + self.ttl;
        self.entries().insert(hash.to_string(), expiry);
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, expiry| *expiry > now);
        before - entries.len()
    }

    /// Number of entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Check if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_has_set_expire() {
        let cache = DedupCache::new(Duration::from_secs(30));
        assert!(!cache.has("ooH"));

        cache.set("ooH");
        assert!(cache.has("ooH"));

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.has("ooH"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.has("ooH"));
        assert!(cache.is_empty(), "expired entry is evicted on lookup");
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = DedupCache::new(Duration::from_secs(10));
        cache.set("ooA");
        tokio::time::advance(Duration::from_secs(6)).await;
        cache.set("ooB");
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.has("ooB"));
    }
}

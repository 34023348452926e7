//! Destination Cache: TTL-bounded mapping from device identifier to a
//! last-known-good MIDI destination. Used exclusively by Send Strategy.

use crate::ids::{Destination, Duid};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    destination: Destination,
    last_success: Instant,
    success_count: u32,
}

#[derive(Debug)]
pub struct DestinationCache {
    entries: HashMap<Duid, CacheEntry>,
    ttl: Duration,
}

impl DestinationCache {
    pub fn new(ttl: Duration) -> Self {
        DestinationCache {
            entries: HashMap::new(),
            ttl,
        }
    }

    /// Record a successful send to `destination` for `duid`.
    ///
    /// If the cached destination differs from `destination`, the entry is
    /// replaced and its success count resets to 1; otherwise the count
    /// increments.
    pub fn record_success(&mut self, duid: Duid, destination: Destination, now: Instant) {
        match self.entries.get_mut(&duid) {
            Some(entry) if entry.destination == destination => {
                entry.success_count += 1;
                entry.last_success = now;
            }
            _ => {
                self.entries.insert(
                    duid,
                    CacheEntry {
                        destination,
                        last_success: now,
                        success_count: 1,
                    },
                );
            }
        }
    }

    /// Return the cached destination if present and not expired. An expired
    /// entry is removed as a side effect.
    pub fn get_cached(&mut self, duid: Duid, now: Instant) -> Option<Destination> {
        let expired = match self.entries.get(&duid) {
            Some(entry) => now.saturating_duration_since(entry.last_success) > self.ttl,
            None => return None,
        };
        if expired {
            self.entries.remove(&duid);
            return None;
        }
        self.entries.get(&duid).map(|e| e.destination.clone())
    }

    pub fn success_count(&self, duid: Duid) -> Option<u32> {
        self.entries.get(&duid).map(|e| e.success_count)
    }

    pub fn invalidate(&mut self, duid: Duid) {
        self.entries.remove(&duid);
    }

    /// Remove every entry older than the TTL.
    pub fn prune_stale(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.last_success) <= ttl);
    }

    pub fn clear_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(s: &str) -> Destination {
        Destination::new(s)
    }

    #[tokio::test]
    async fn get_cached_returns_none_for_unknown_duid() {
        let mut c = DestinationCache::new(Duration::from_secs(30));
        assert!(c.get_cached(Duid::new(1), Instant::now()).is_none());
    }

    #[tokio::test]
    async fn get_cached_returns_some_within_ttl() {
        let mut c = DestinationCache::new(Duration::from_secs(30));
        let now = Instant::now();
        c.record_success(Duid::new(1), dest("ep1"), now);
        assert_eq!(c.get_cached(Duid::new(1), now), Some(dest("ep1")));
    }

    #[tokio::test]
    async fn get_cached_returns_none_and_removes_after_ttl() {
        let mut c = DestinationCache::new(Duration::from_millis(100));
        let now = Instant::now();
        c.record_success(Duid::new(1), dest("ep1"), now);
        let later = now + Duration::from_millis(150);
        assert!(c.get_cached(Duid::new(1), later).is_none());
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn record_success_same_destination_increments_count() {
        let mut c = DestinationCache::new(Duration::from_secs(30));
        let now = Instant::now();
        let d = Duid::new(1);
        c.record_success(d, dest("ep1"), now);
        c.record_success(d, dest("ep1"), now);
        assert_eq!(c.success_count(d), Some(2));
    }

    #[tokio::test]
    async fn record_success_different_destination_resets_count_to_one() {
        let mut c = DestinationCache::new(Duration::from_secs(30));
        let now = Instant::now();
        let d = Duid::new(1);
        c.record_success(d, dest("ep1"), now);
        c.record_success(d, dest("ep1"), now);
        c.record_success(d, dest("ep2"), now);
        assert_eq!(c.success_count(d), Some(1));
        assert_eq!(c.get_cached(d, now), Some(dest("ep2")));
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let mut c = DestinationCache::new(Duration::from_secs(30));
        let now = Instant::now();
        let d = Duid::new(1);
        c.record_success(d, dest("ep1"), now);
        c.invalidate(d);
        assert!(c.get_cached(d, now).is_none());
    }

    #[tokio::test]
    async fn prune_stale_removes_only_expired_entries() {
        let mut c = DestinationCache::new(Duration::from_millis(100));
        let now = Instant::now();
        c.record_success(Duid::new(1), dest("ep1"), now);
        let later = now + Duration::from_millis(60);
        c.record_success(Duid::new(2), dest("ep2"), later);
        c.prune_stale(now + Duration::from_millis(150));
        assert!(c.get_cached(Duid::new(1), now + Duration::from_millis(150)).is_none());
        assert_eq!(c.len(), 1);
    }

    #[tokio::test]
    async fn clear_all_empties_the_cache() {
        let mut c = DestinationCache::new(Duration::from_secs(30));
        let now = Instant::now();
        c.record_success(Duid::new(1), dest("ep1"), now);
        c.record_success(Duid::new(2), dest("ep2"), now);
        c.clear_all();
        assert!(c.is_empty());
    }
}

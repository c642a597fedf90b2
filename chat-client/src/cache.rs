//! TTL-windowed read cache.
//!
//! Session-scoped memoization of ledger reads. Entries are valid while their
//! age is below their TTL and expire lazily on read. [`ReadCache::get_or_fetch`]
//! collapses concurrent fetches of the same key into one provider call.
//!
//! [`ReadCache::clear`] starts a new generation. A fetch that began before
//! the clear still returns its value to its caller but never stores it.

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self) -> bool {
        self.stored_at.elapsed() < self.ttl
    }
}

/// Read cache keyed by call.
#[derive(Debug)]
pub struct ReadCache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    generation: AtomicU64,
    default_ttl: Duration,
}

impl<V: Clone> ReadCache<V> {
    /// Create an empty cache whose `set` uses `default_ttl`.
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            in_flight: DashMap::new(),
            generation: AtomicU64::new(0),
            default_ttl,
        }
    }

    /// Fresh value for `key`, if any. Expired entries are dropped.
    pub fn get(&self, key: &str) -> Option<V> {
        let fresh = self.entries.get(key).map(|e| (e.is_fresh(), e.value.clone()));
        match fresh {
            Some((true, value)) => {
                trace!(key, "Cache hit");
                Some(value)
            }
            Some((false, _)) => {
                self.entries.remove_if(key, |_, e| !e.is_fresh());
                trace!(key, "Cache expired");
                None
            }
            None => None,
        }
    }

    /// Store `value` under the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Store `value` under an explicit TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                value,
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Drop `key`.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every key starting with `prefix`.
    pub fn invalidate_prefix(&self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }

    /// Drop everything, including results of fetches still in flight.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
        self.in_flight.clear();
    }

    /// Current generation. Bumped by every [`clear`](Self::clear).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Number of keys with a fetch gate, waited on or not.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of stored entries, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached value for `key`, or the result of `fetch` stored under `ttl`.
    ///
    /// Concurrent callers for the same key wait for the first fetch instead
    /// of issuing their own. Errors are returned to every waiter that ends
    /// up fetching and are never stored, and neither is a value whose fetch
    /// was overtaken by [`clear`](Self::clear).
    pub async fn get_or_fetch<E, F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let gate = self
            .in_flight
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = gate.lock().await;

        // Someone else may have filled it while we waited.
        let result = match self.get(key) {
            Some(value) => Ok(value),
            None => {
                trace!(key, "Cache miss");
                let generation = self.generation();
                let result = fetch().await;
                if let Ok(value) = &result {
                    self.set_if_current(generation, key, value.clone(), ttl);
                }
                result
            }
        };

        drop(guard);
        // Only this call and the map still hold the gate: nobody is waiting.
        self.in_flight
            .remove_if(key, |_, g| Arc::ptr_eq(g, &gate) && Arc::strong_count(g) <= 2);
        result
    }

    /// Store `value` only if no [`clear`](Self::clear) happened since
    /// `generation` was read. Returns whether it was stored.
    pub fn set_if_current(
        &self,
        generation: u64,
        key: impl Into<String>,
        value: V,
        ttl: Duration,
    ) -> bool {
        let key = key.into();
        // The shard lock is held across the check, so a concurrent clear
        // either removes this entry or makes the check fail.
        let entry = self.entries.entry(key);
        if self.generation() != generation {
            trace!(key = entry.key().as_str(), "Discarding value from before clear");
            return false;
        }
        entry.insert(CacheEntry {
            value,
            stored_at: Instant::now(),
            ttl,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TTL: Duration = Duration::from_secs(5);

    // ===========================================
    // Expiry
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn value_valid_within_ttl() {
        let cache = ReadCache::new(TTL);
        cache.set("k", 7u32);

        tokio::time::advance(Duration::from_millis(4999)).await;
        assert_eq!(cache.get("k"), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn value_expires_at_ttl() {
        let cache = ReadCache::new(TTL);
        cache.set("k", 7u32);

        tokio::time::advance(TTL).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_ttl_overrides_default() {
        let cache = ReadCache::new(TTL);
        cache.set_with_ttl("room", 1u32, Duration::from_secs(86_400));

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(cache.get("room"), Some(1));
    }

    #[tokio::test]
    async fn set_overwrites() {
        let cache = ReadCache::new(TTL);
        cache.set("k", 1u32);
        cache.set("k", 2u32);
        assert_eq!(cache.get("k"), Some(2));
    }

    #[tokio::test]
    async fn invalidate_and_clear() {
        let cache = ReadCache::new(TTL);
        cache.set("isParticipant:a", true);
        cache.set("isParticipant:b", true);
        cache.set("getUserRooms:a", false);

        cache.invalidate("getUserRooms:a");
        assert_eq!(cache.get("getUserRooms:a"), None);

        cache.invalidate_prefix("isParticipant:");
        assert!(cache.is_empty());

        cache.set("x", true);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    // ===========================================
    // Fetching
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn fetch_once_within_ttl_twice_after() {
        let cache = ReadCache::new(TTL);
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>(42u32)
        };

        assert_eq!(cache.get_or_fetch("k", TTL, fetch).await, Ok(42));
        assert_eq!(cache.get_or_fetch("k", TTL, fetch).await, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(TTL).await;
        assert_eq!(cache.get_or_fetch("k", TTL, fetch).await, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache: ReadCache<u32> = ReadCache::new(TTL);
        let err = cache
            .get_or_fetch("k", TTL, || async { Err::<u32, _>("boom") })
            .await;
        assert_eq!(err, Err("boom"));
        assert!(cache.is_empty());

        let ok = cache
            .get_or_fetch("k", TTL, || async { Ok::<_, &str>(1) })
            .await;
        assert_eq!(ok, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_collapse() {
        let cache = Arc::new(ReadCache::new(TTL));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch("k", TTL, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, ()>(9u32)
                    })
                    .await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(9));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.in_flight_len(), 0);
    }

    // ===========================================
    // Clearing
    // ===========================================

    #[tokio::test(start_paused = true)]
    async fn fetch_overtaken_by_clear_is_not_stored() {
        let cache = Arc::new(ReadCache::new(TTL));

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("getGlobalRoomId", TTL, || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, ()>(1u32)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear();

        // The caller still gets its answer; the cache does not keep it.
        assert_eq!(slow.await.unwrap(), Ok(1));
        assert_eq!(cache.get("getGlobalRoomId"), None);

        let fresh = cache
            .get_or_fetch("getGlobalRoomId", TTL, || async { Ok::<_, ()>(2u32) })
            .await;
        assert_eq!(fresh, Ok(2));
        assert_eq!(cache.get("getGlobalRoomId"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_after_clear_is_not_blocked_by_old_gate() {
        let cache = Arc::new(ReadCache::new(TTL));

        let slow = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_fetch("k", TTL, || async {
                        tokio::time::sleep(Duration::from_secs(10)).await;
                        Ok::<_, ()>(1u32)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.clear();
        assert_eq!(cache.in_flight_len(), 0);

        let started = Instant::now();
        let fresh = cache
            .get_or_fetch("k", TTL, || async { Ok::<_, ()>(2u32) })
            .await;
        assert_eq!(fresh, Ok(2));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(cache.get("k"), Some(2));

        assert_eq!(slow.await.unwrap(), Ok(1));
        assert_ne!(cache.get("k"), Some(1));
    }

    #[tokio::test]
    async fn gates_are_released_after_fetch() {
        let cache: ReadCache<u32> = ReadCache::new(TTL);
        for i in 0..10u32 {
            let key = format!("isRegistered:{i}");
            let _ = cache.get_or_fetch(&key, TTL, move || async move { Ok::<_, ()>(i) }).await;
            let _ = cache
                .get_or_fetch("fails", TTL, || async { Err::<u32, _>(()) })
                .await;
        }
        assert_eq!(cache.len(), 10);
        assert_eq!(cache.in_flight_len(), 0);
    }
}

//! Cache of refreshed tokens, keyed by the expired token they replace.
//!
//! The [`TokenCache`] trait abstracts over storage backends so the filter
//! never depends on a concrete map. [`InMemoryTokenCache`] is a `DashMap`
//! shared by all in-flight requests:
//!
//! - keys are the SHA-256 of the original token, so expired credentials are
//!   not kept around verbatim
//! - an entry lives until the *replacement* token expires (read from its
//!   `exp` claim, or `fallback_ttl` when unreadable); after that the mapping
//!   is useless
//! - with `max_entries > 0` the map is bounded; a full map first drops
//!   expired entries, then the entry closest to expiry. Concurrent stores can
//!   overshoot the bound by the number of racing writers.
//!
//! Writes are last-write-wins. Refreshing the same stale token twice is
//! harmless, so no compare-and-swap is needed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::verifier::peek_expiry;
use crate::config::TokenCacheConfig;

/// Storage for original-token → replacement-token mappings.
///
/// Implementations must be `Send + Sync`; one instance is shared across all
/// request tasks.
#[async_trait]
pub trait TokenCache: Send + Sync + 'static {
    /// Replacement for `original`, if one is cached and still usable
    async fn lookup(&self, original: &str) -> Option<String>;

    /// Record `replacement` for `original`, overwriting any previous value
    async fn store(&self, original: &str, replacement: &str);

    /// Number of cached entries (expired ones included until reaped)
    async fn len(&self) -> usize;

    /// Whether the cache holds no entries
    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove all expired entries, returning how many were dropped
    async fn reap_expired(&self) -> usize;
}

struct CachedReplacement {
    token: String,
    /// Unix seconds after which the replacement is no longer worth serving
    expires_at: u64,
}

impl CachedReplacement {
    fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Entries dropped for expiry or capacity
    pub evictions: u64,
}

/// In-memory [`TokenCache`] backed by a `DashMap`
pub struct InMemoryTokenCache {
    entries: DashMap<String, CachedReplacement>,
    max_entries: usize,
    fallback_ttl: Duration,
    stats: CacheStats,
}

impl InMemoryTokenCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(config: &TokenCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: config.max_entries,
            fallback_ttl: config.fallback_ttl,
            stats: CacheStats::default(),
        }
    }

    /// Current statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
        }
    }

    fn insert_entry(&self, original: &str, token: String, expires_at: u64) {
        let key = fingerprint(original);
        if self.max_entries > 0
            && self.entries.len() >= self.max_entries
            && !self.entries.contains_key(&key)
        {
            self.make_room();
        }
        self.entries.insert(key, CachedReplacement { token, expires_at });
    }

    fn make_room(&self) {
        let now = unix_now();
        let mut dropped = self.remove_expired(now);

        while self.entries.len() >= self.max_entries {
            // Collect first: removing while iterating would deadlock the shard
            let soonest = self
                .entries
                .iter()
                .min_by_key(|e| e.value().expires_at)
                .map(|e| e.key().clone());
            let Some(key) = soonest else { break };
            if self.entries.remove(&key).is_some() {
                dropped += 1;
            }
        }

        if dropped > 0 {
            self.stats.evictions.fetch_add(dropped as u64, Ordering::Relaxed);
            debug!(count = dropped, "Evicted token cache entries to make room");
        }
    }

    fn remove_expired(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl TokenCache for InMemoryTokenCache {
    async fn lookup(&self, original: &str) -> Option<String> {
        let key = fingerprint(original);
        let now = unix_now();

        let Some(entry) = self.entries.get(&key) else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired(now) {
            // Entry expired - evict it
            drop(entry);
            self.entries.remove_if(&key, |_, e| e.is_expired(now));
            self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.token.clone())
    }

    async fn store(&self, original: &str, replacement: &str) {
        let expires_at = peek_expiry(replacement)
            .unwrap_or_else(|| unix_now().saturating_add(self.fallback_ttl.as_secs()));
        self.insert_entry(original, replacement.to_string(), expires_at);
    }

    async fn len(&self) -> usize {
        self.entries.len()
    }

    async fn reap_expired(&self) -> usize {
        let count = self.remove_expired(unix_now());
        self.stats.evictions.fetch_add(count as u64, Ordering::Relaxed);
        count
    }
}

/// Spawn a background task that reaps expired entries every `interval`.
///
/// The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    cache: Arc<dyn TokenCache>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = cache.reap_expired().await;
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired token cache entries");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Token cache reaper shutting down");
                    break;
                }
            }
        }
    });
}

/// Hex SHA-256 of a token, used wherever a token must key a map
pub(crate) fn fingerprint(original: &str) -> String {
    hex::encode(Sha256::digest(original.as_bytes()))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

//! Content Cache (§4.4): a byte-budgeted, strict-LRU store with per-entry
//! TTL, hit/miss statistics, snapshot export/import, and a cooperative
//! background reaper.
//!
//! Pre-eviction happens *before* insertion so `current_bytes() <= budget`
//! holds after every `put` returns (I4); an entry whose own size exceeds the
//! whole budget is rejected outright rather than partially evicting the
//! cache to make room for something that could never fit.

pub mod domain_types;

pub use domain_types::{depth_key, llm_key, primer_key, CacheError, CacheStats};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use chrono::{DateTime, Utc};

use crate::config::CoreConfig;
use crate::domain_types::{Artifact, ConceptId, Modality, Provenance};
use crate::error::Error;
use crate::observability::{Event, EventSink};
use domain_types::{CacheEntry, SerializedEntry};

struct Inner {
    config: CoreConfig,
    sink: Arc<dyn EventSink>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    running: AtomicBool,
    notify: Notify,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

/// Byte-budgeted LRU content cache with TTL expiry (§4.4).
#[derive(Clone)]
pub struct ContentCache {
    inner: Arc<Inner>,
}

impl ContentCache {
    /// Builds an empty cache and starts its background reaper.
    #[must_use]
    pub fn new(config: CoreConfig, sink: Arc<dyn EventSink>) -> Self {
        let inner = Arc::new(Inner {
            config,
            sink,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            running: AtomicBool::new(true),
            notify: Notify::new(),
            reaper: Mutex::new(None),
        });
        let reaper_inner = Arc::clone(&inner);
        let handle = tokio::spawn(Self::reaper_loop(reaper_inner));
        *inner.reaper.lock().expect("reaper mutex poisoned") = Some(handle);
        Self { inner }
    }

    /// Looks up `key`. On hit, bumps the entry's access count and last-access
    /// instant and returns a cache-stamped copy of the artifact. A stale
    /// entry is removed and reported as a miss.
    #[instrument(skip(self))]
    pub fn get(&self, key: &str) -> Option<Artifact> {
        let now = SystemTime::now();
        let mut entries = self.inner.entries.lock().expect("cache mutex poisoned");
        match entries.get_mut(key) {
            Some(entry) if entry.is_stale(now) => {
                entries.remove(key);
                drop(entries);
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .sink
                    .emit(Event::new("cache_miss").with("key", key.to_string()));
                None
            }
            Some(entry) => {
                entry.access_count += 1;
                entry.last_access = now;
                let artifact = entry.artifact.as_cached();
                drop(entries);
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .sink
                    .emit(Event::new("cache_hit").with("key", key.to_string()));
                Some(artifact)
            }
            None => {
                drop(entries);
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                self.inner
                    .sink
                    .emit(Event::new("cache_miss").with("key", key.to_string()));
                None
            }
        }
    }

    /// Inserts `artifact` under `key`, evicting least-recently-used entries
    /// until it fits within the configured byte budget (§4.4, I4).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::EntryExceedsBudget`] if the entry's own
    /// estimated size is larger than the whole budget; no eviction is
    /// performed in that case.
    #[instrument(skip(self, artifact))]
    pub fn put(
        &self,
        key: impl Into<String>,
        artifact: Artifact,
        ttl: Option<Duration>,
    ) -> Result<(), Error> {
        let key = key.into();
        let size = estimate_size(&artifact)?;
        let budget = self.inner.config.cache_budget_bytes.into_inner();
        if size > budget {
            return Err(CacheError::EntryExceedsBudget { size, budget }.into());
        }

        let mut entries = self.inner.entries.lock().expect("cache mutex poisoned");
        let mut current_bytes: usize = entries.values().map(|e| e.size).sum();
        if let Some(existing) = entries.get(&key) {
            current_bytes -= existing.size;
        }

        while current_bytes + size > budget {
            let Some(lru_key) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(k, _)| k.clone())
            else {
                break;
            };
            if let Some(evicted) = entries.remove(&lru_key) {
                current_bytes -= evicted.size;
                self.inner.sink.emit(
                    Event::new("cache_evicted")
                        .with("key", lru_key)
                        .with("reason", "lru"),
                );
            }
        }

        let now = SystemTime::now();
        entries.insert(
            key.clone(),
            CacheEntry {
                artifact,
                created_at: now,
                last_access: now,
                access_count: 0,
                ttl: ttl.unwrap_or_else(|| self.inner.config.default_entry_ttl_ms.as_duration()),
                size,
            },
        );
        let entry_count = entries.len();
        drop(entries);
        self.inner.sink.emit(
            Event::new("cache_put")
                .with("key", key)
                .with("entryCount", entry_count as i64),
        );
        Ok(())
    }

    /// True iff `key` is present and not stale. Does not affect hit/miss
    /// statistics or LRU ordering.
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        let now = SystemTime::now();
        self.inner
            .entries
            .lock()
            .expect("cache mutex poisoned")
            .get(key)
            .is_some_and(|entry| !entry.is_stale(now))
    }

    /// Removes `key` unconditionally, present or not.
    pub fn evict(&self, key: &str) {
        self.inner
            .entries
            .lock()
            .expect("cache mutex poisoned")
            .remove(key);
    }

    /// Inserts placeholder artifacts for every concept/modality pair with an
    /// extended TTL (7x the configured default), skipping pairs already
    /// present and not stale (§4.4).
    pub fn preload(&self, concepts: &[ConceptId], modalities: &[Modality]) {
        let extended_ttl = self.inner.config.default_entry_ttl_ms.as_duration() * 7;
        for concept in concepts {
            for modality in modalities {
                let key = llm_key(concept.as_ref(), modality.as_ref(), 0);
                if self.has(&key) {
                    continue;
                }
                let placeholder = Artifact::new(Vec::new(), Provenance::Preloaded);
                let _ = self.put(key, placeholder, Some(extended_ttl));
            }
        }
    }

    /// Drops the least-accessed ~25% of entries, ties broken by oldest
    /// last-access (§4.4).
    pub fn optimize(&self) {
        let mut entries = self.inner.entries.lock().expect("cache mutex poisoned");
        let drop_count = entries.len() / 4;
        if drop_count == 0 {
            return;
        }
        let mut ranked: Vec<(String, u64, SystemTime)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.access_count, entry.last_access))
            .collect();
        ranked.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)));
        for (key, _, _) in ranked.into_iter().take(drop_count) {
            entries.remove(&key);
        }
    }

    /// Serializes every non-expired entry into the self-describing snapshot
    /// format (§6).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if encoding fails.
    pub fn snapshot(&self) -> Result<Vec<u8>, Error> {
        let now = SystemTime::now();
        let entries = self.inner.entries.lock().expect("cache mutex poisoned");
        let serialized: Vec<SerializedEntry> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_stale(now))
            .map(|(key, entry)| SerializedEntry {
                key: key.clone(),
                artifact: entry.artifact.clone(),
                created_at: DateTime::<Utc>::from(entry.created_at),
                last_access: DateTime::<Utc>::from(entry.last_access),
                access_count: entry.access_count,
                ttl_ms: u64::try_from(entry.ttl.as_millis()).unwrap_or(u64::MAX),
                size: entry.size,
            })
            .collect();
        Ok(serde_json::to_vec(&serialized)?)
    }

    /// Restores entries from a snapshot produced by [`Self::snapshot`].
    /// Entries whose TTL has already expired are silently dropped (§6).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] if `bytes` is not a valid snapshot.
    pub fn restore(&self, bytes: &[u8]) -> Result<(), Error> {
        let serialized: Vec<SerializedEntry> = serde_json::from_slice(bytes)?;
        let now = SystemTime::now();
        let mut entries = self.inner.entries.lock().expect("cache mutex poisoned");
        for item in serialized {
            let entry = CacheEntry {
                artifact: item.artifact,
                created_at: SystemTime::from(item.created_at),
                last_access: SystemTime::from(item.last_access),
                access_count: item.access_count,
                ttl: Duration::from_millis(item.ttl_ms),
                size: item.size,
            };
            if !entry.is_stale(now) {
                entries.insert(item.key, entry);
            }
        }
        Ok(())
    }

    /// A point-in-time snapshot of entry count, hit rate, byte usage, and
    /// timestamp extremes (§4.4).
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let entries = self.inner.entries.lock().expect("cache mutex poisoned");
        let entry_count = entries.len();
        let total_bytes = entries.values().map(|e| e.size).sum();
        let oldest = entries.values().map(|e| e.created_at).min();
        let newest = entries.values().map(|e| e.created_at).max();
        drop(entries);
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let hit_rate = if hits + misses == 0 {
            0.0
        } else {
            hits as f64 / (hits + misses) as f64
        };
        CacheStats {
            entry_count,
            hit_rate,
            total_bytes,
            budget: self.inner.config.cache_budget_bytes.into_inner(),
            oldest_created_at_ms: oldest.map(epoch_ms),
            newest_created_at_ms: newest.map(epoch_ms),
        }
    }

    /// Stops the background reaper and clears every entry.
    pub fn destroy(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.notify.notify_one();
        self.inner.entries.lock().expect("cache mutex poisoned").clear();
    }

    async fn reaper_loop(inner: Arc<Inner>) {
        let interval = inner.config.reaper_interval_ms.as_duration();
        loop {
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = inner.notify.notified() => {}
            }
            if !inner.running.load(Ordering::SeqCst) {
                return;
            }
            let now = SystemTime::now();
            let mut entries = inner.entries.lock().expect("cache mutex poisoned");
            let stale: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| entry.is_stale(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &stale {
                entries.remove(key);
            }
            let remaining = entries.len();
            drop(entries);
            if !stale.is_empty() {
                debug!(reaped = stale.len(), remaining, "cache reaper swept stale entries");
                inner
                    .sink
                    .emit(Event::new("cache_reaped").with("count", stale.len() as i64));
            }
        }
    }
}

fn estimate_size(artifact: &Artifact) -> Result<usize, Error> {
    Ok(serde_json::to_vec(artifact)?.len())
}

fn epoch_ms(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::NoopSink;

    fn cache_with_budget(budget: usize) -> ContentCache {
        let mut config = CoreConfig::testing();
        config.cache_budget_bytes = crate::config::CacheBudgetBytes::try_new(budget).unwrap();
        ContentCache::new(config, Arc::new(NoopSink))
    }

    fn artifact_of_size(payload_len: usize) -> Artifact {
        Artifact::new(vec![b'x'; payload_len], Provenance::StaticFallback)
    }

    fn entry_byte_size(payload_len: usize) -> usize {
        estimate_size(&artifact_of_size(payload_len)).unwrap()
    }

    #[tokio::test]
    async fn test_lru_eviction_picks_least_recently_used_entry() {
        let unit = entry_byte_size(400);
        let cache = cache_with_budget(unit * 3);
        cache.put("a", artifact_of_size(400), None).unwrap();
        cache.put("b", artifact_of_size(400), None).unwrap();
        cache.put("c", artifact_of_size(400), None).unwrap();
        // Touch "a" so "b" becomes the least-recently-used entry.
        assert!(cache.get("a").is_some());

        cache.put("d", artifact_of_size(400), None).unwrap();

        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(cache.has("c"));
        assert!(cache.has("d"));
        let stats = cache.stats();
        assert!(stats.total_bytes <= stats.budget);
        cache.destroy();
    }

    #[tokio::test]
    async fn test_entry_larger_than_budget_is_rejected_without_partial_eviction() {
        let unit = entry_byte_size(400);
        let cache = cache_with_budget(unit);
        cache.put("a", artifact_of_size(400), None).unwrap();
        let result = cache.put("huge", artifact_of_size(10_000), None);
        assert!(result.is_err());
        assert!(cache.has("a"));
        cache.destroy();
    }

    #[tokio::test]
    async fn test_get_returns_miss_after_ttl_expires() {
        let cache = cache_with_budget(1_000_000);
        cache
            .put("k", artifact_of_size(10), Some(Duration::from_millis(20)))
            .unwrap();
        assert!(cache.get("k").is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("k").is_none());
        assert!(!cache.has("k"));
        cache.destroy();
    }

    #[tokio::test]
    async fn test_snapshot_restore_round_trip_preserves_non_expired_entries() {
        let cache = cache_with_budget(1_000_000);
        cache.put("k1", artifact_of_size(10), None).unwrap();
        cache
            .put("k2", artifact_of_size(10), Some(Duration::from_millis(5)))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let bytes = cache.snapshot().unwrap();

        let restored = cache_with_budget(1_000_000);
        restored.restore(&bytes).unwrap();
        assert!(restored.has("k1"));
        assert!(!restored.has("k2"));
        cache.destroy();
        restored.destroy();
    }

    #[tokio::test]
    async fn test_optimize_drops_least_accessed_quarter() {
        let cache = cache_with_budget(1_000_000);
        for name in ["a", "b", "c", "d"] {
            cache.put(name, artifact_of_size(10), None).unwrap();
        }
        // Access everything but "a" so it is the least-accessed entry.
        for name in ["b", "c", "d"] {
            cache.get(name);
        }
        cache.optimize();
        assert!(!cache.has("a"));
        assert!(cache.has("b"));
        cache.destroy();
    }

    #[test]
    fn test_key_derivation_normalizes_whitespace_and_case() {
        let key = depth_key("Photo Synthesis", "Animation", 3, "Ada Lovelace", 2);
        assert_eq!(key, "photo_synthesis:animation:3:ada_lovelace:2");
        assert_eq!(llm_key("Gravity", "text", 1), "llm:gravity:text:1");
    }
}

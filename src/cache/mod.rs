//! Result cache: memoizes inference outputs by request fingerprint.
//!
//! Lookups are TTL- and capacity-bounded; misses for the same fingerprint
//! collapse into a single inference call (single-flight). Entries survive
//! restarts via a gzip snapshot that is refreshed periodically and at
//! shutdown.

pub mod fingerprint;
pub mod single_flight;
pub mod snapshot;

pub use fingerprint::fingerprint;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::error::Result;
use crate::types::{ResponseSource, ResultKind, Translation};
use single_flight::FlightMap;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Evict least-recently-used entries beyond this count.
    pub max_entries: usize,
    /// TTL for text results (seconds).
    pub text_ttl_secs: i64,
    /// TTL for audio-derived results (seconds). Audio transcriptions go
    /// stale much faster than plain text.
    pub audio_ttl_secs: i64,
    /// Snapshot file; `None` runs in-memory only.
    pub snapshot_path: Option<PathBuf>,
    /// How often the background loop snapshots and sweeps expired entries.
    pub snapshot_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            text_ttl_secs: 86_400,
            audio_ttl_secs: 3_600,
            snapshot_path: None,
            snapshot_interval_secs: 300,
        }
    }
}

impl CacheConfig {
    /// Load config from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("DRIFTLESS_DATA_DIR").unwrap_or_else(|_| "./data".to_string());
        Self {
            max_entries: std::env::var("DRIFTLESS_CACHE_MAX_ENTRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            text_ttl_secs: std::env::var("DRIFTLESS_CACHE_TEXT_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(86_400),
            audio_ttl_secs: std::env::var("DRIFTLESS_CACHE_AUDIO_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3_600),
            snapshot_path: Some(PathBuf::from(data_dir).join("cache_snapshot.json.gz")),
            snapshot_interval_secs: std::env::var("DRIFTLESS_CACHE_SNAPSHOT_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(300),
        }
    }

    /// In-memory config for tests.
    pub fn in_memory() -> Self {
        Self {
            snapshot_path: None,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub value: Translation,
    pub kind: ResultKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

pub struct ResultCache {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,
    flights: FlightMap,
    hits: AtomicU64,
    misses: AtomicU64,
    shutdown: Notify,
}

impl ResultCache {
    /// Create a cache, restoring entries from the snapshot file if one
    /// exists. Entries past their TTL are dropped during load, not restored.
    pub fn new(config: CacheConfig) -> Arc<Self> {
        let entries = DashMap::new();
        if let Some(ref path) = config.snapshot_path {
            if path.exists() {
                match snapshot::load(path) {
                    Ok(restored) => {
                        let count = restored.len();
                        for entry in restored {
                            entries.insert(entry.fingerprint.clone(), entry);
                        }
                        tracing::info!("[cache] restored {} entries from snapshot", count);
                    }
                    Err(e) => {
                        tracing::warn!("[cache] snapshot load failed, starting empty: {}", e);
                    }
                }
            }
        }

        Arc::new(Self {
            config,
            entries,
            flights: FlightMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            shutdown: Notify::new(),
        })
    }

    /// Look up a live entry. Expired entries are logically absent: they
    /// return `None` and are removed on touch.
    pub fn get(&self, fingerprint: &str) -> Option<Translation> {
        let now = Utc::now();

        let expired = match self.entries.get_mut(fingerprint) {
            Some(mut entry) => {
                if entry.is_expired(now) {
                    true
                } else {
                    entry.last_accessed_at = now;
                    entry.hit_count += 1;
                    let value = entry.value.clone();
                    drop(entry);
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if expired {
            self.entries.remove(fingerprint);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert or replace the entry for a fingerprint with a fresh TTL.
    pub fn put(&self, fingerprint: &str, value: Translation, kind: ResultKind) {
        let now = Utc::now();
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            value,
            kind,
            created_at: now,
            expires_at: now + self.ttl_for(kind),
            last_accessed_at: now,
            hit_count: 0,
        };
        self.entries.insert(fingerprint.to_string(), entry);
        self.enforce_capacity();
    }

    /// Cloud-authoritative overwrite applied during reconciliation.
    pub fn apply_canonical(&self, canonical: &crate::types::CanonicalTranslation) {
        tracing::info!(
            "[cache] canonical overwrite for {}",
            &canonical.fingerprint[..12.min(canonical.fingerprint.len())]
        );
        self.put(&canonical.fingerprint, canonical.translation.clone(), canonical.kind);
    }

    /// Single-flight lookup-or-compute. Concurrent callers for the same
    /// fingerprint run `compute` at most once; everyone else waits and then
    /// hits the cache. A failed compute is not cached and the error goes to
    /// every caller that reaches it.
    pub async fn get_or_compute<F, Fut>(
        &self,
        fingerprint: &str,
        kind: ResultKind,
        compute: F,
    ) -> Result<(Translation, ResponseSource)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Translation>>,
    {
        if let Some(value) = self.get(fingerprint) {
            return Ok((value, ResponseSource::Cache));
        }

        let guard = self.flights.acquire(fingerprint).await;

        // Re-check: another caller may have finished the flight while we
        // waited on its lock.
        if let Some(value) = self.get(fingerprint) {
            guard.finish(&self.flights);
            return Ok((value, ResponseSource::Cache));
        }

        let result = compute().await;
        match result {
            Ok(value) => {
                self.put(fingerprint, value.clone(), kind);
                guard.finish(&self.flights);
                Ok((value, ResponseSource::Inference))
            }
            Err(e) => {
                guard.finish(&self.flights);
                Err(e)
            }
        }
    }

    /// Drop every entry past its TTL. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            size: self.entries.len(),
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Persist live entries to the snapshot file. A write failure degrades
    /// to in-memory-only operation with a warning.
    pub fn save_snapshot(&self) {
        let Some(ref path) = self.config.snapshot_path else {
            return;
        };
        let entries: Vec<CacheEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        match snapshot::save(&entries, path) {
            Ok(()) => tracing::debug!("[cache] snapshot saved, {} entries", entries.len()),
            Err(e) => tracing::warn!("[cache] snapshot save failed, continuing in-memory: {}", e),
        }
    }

    /// Background loop: periodic expiry sweep + snapshot. Runs until
    /// `shutdown()`; takes one final snapshot before exiting.
    pub async fn run_snapshot_loop(self: Arc<Self>) {
        let interval = tokio::time::Duration::from_secs(self.config.snapshot_interval_secs);
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the first immediate tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_expired();
                    if evicted > 0 {
                        tracing::debug!("[cache] evicted {} expired entries", evicted);
                    }
                    self.save_snapshot();
                }
                _ = self.shutdown.notified() => {
                    self.save_snapshot();
                    tracing::info!("[cache] snapshot loop shutting down");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    fn ttl_for(&self, kind: ResultKind) -> ChronoDuration {
        match kind {
            ResultKind::Text => ChronoDuration::seconds(self.config.text_ttl_secs),
            ResultKind::Audio => ChronoDuration::seconds(self.config.audio_ttl_secs),
        }
    }

    /// LRU eviction once the map grows past `max_entries`.
    fn enforce_capacity(&self) {
        let over = self.entries.len().saturating_sub(self.config.max_entries);
        if over == 0 {
            return;
        }

        let mut by_access: Vec<(String, DateTime<Utc>)> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.last_accessed_at))
            .collect();
        by_access.sort_by_key(|(_, at)| *at);

        for (key, _) in by_access.into_iter().take(over) {
            self.entries.remove(&key);
        }
        tracing::debug!("[cache] evicted {} entries over capacity", over);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriftlessError;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    fn cache_with(max_entries: usize) -> Arc<ResultCache> {
        ResultCache::new(CacheConfig {
            max_entries,
            ..CacheConfig::in_memory()
        })
    }

    #[test]
    fn test_put_get_roundtrip() {
        let cache = cache_with(100);
        cache.put("fp1", Translation::new("hola", 0.9), ResultKind::Text);

        let got = cache.get("fp1").expect("should hit");
        assert_eq!(got.text, "hola");
        assert!(cache.get("missing").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_expired_entry_is_logically_absent() {
        let cache = ResultCache::new(CacheConfig {
            text_ttl_secs: -1, // already expired on insert
            ..CacheConfig::in_memory()
        });
        cache.put("fp1", Translation::new("hola", 0.9), ResultKind::Text);

        assert!(cache.get("fp1").is_none());
        // Physically removed on touch as well.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_evict_expired_sweep() {
        let cache = ResultCache::new(CacheConfig {
            audio_ttl_secs: -1,
            ..CacheConfig::in_memory()
        });
        cache.put("text", Translation::new("a", 0.9), ResultKind::Text);
        cache.put("audio", Translation::new("b", 0.9), ResultKind::Audio);

        assert_eq!(cache.evict_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("text").is_some());
    }

    #[test]
    fn test_lru_eviction_over_capacity() {
        let cache = cache_with(3);
        cache.put("a", Translation::new("a", 0.9), ResultKind::Text);
        cache.put("b", Translation::new("b", 0.9), ResultKind::Text);
        cache.put("c", Translation::new("c", 0.9), ResultKind::Text);

        // Touch "a" so "b" becomes the least recently used.
        let _ = cache.get("a");
        cache.put("d", Translation::new("d", 0.9), ResultKind::Text);

        assert_eq!(cache.len(), 3);
        assert!(cache.get("b").is_none(), "LRU entry should be evicted");
        assert!(cache.get("a").is_some());
        assert!(cache.get("d").is_some());
    }

    #[tokio::test]
    async fn test_single_flight_computes_once() {
        let cache = cache_with(100);
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("fp", ResultKind::Text, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                        Ok(Translation::new("fiebre", 0.9))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut cache_hits = 0;
        for h in handles {
            let (value, source) = h.await.unwrap();
            assert_eq!(value.text, "fiebre");
            if source == ResponseSource::Cache {
                cache_hits += 1;
            }
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1, "compute ran more than once");
        assert_eq!(cache_hits, 9, "all waiters should be served from cache");
    }

    #[tokio::test]
    async fn test_failed_compute_not_cached() {
        let cache = cache_with(100);

        let result = cache
            .get_or_compute("fp", ResultKind::Text, || async {
                Err(DriftlessError::Inference("model not loaded".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(cache.len(), 0);

        // A later caller retries and can succeed.
        let (value, source) = cache
            .get_or_compute("fp", ResultKind::Text, || async {
                Ok(Translation::new("ok", 0.8))
            })
            .await
            .unwrap();
        assert_eq!(value.text, "ok");
        assert_eq!(source, ResponseSource::Inference);
    }

    #[test]
    #[serial_test::serial]
    fn test_config_from_env() {
        std::env::set_var("DRIFTLESS_DATA_DIR", "/tmp/driftless-env-test");
        std::env::set_var("DRIFTLESS_CACHE_MAX_ENTRIES", "123");
        let config = CacheConfig::from_env();
        assert_eq!(config.max_entries, 123);
        assert!(config
            .snapshot_path
            .unwrap()
            .starts_with("/tmp/driftless-env-test"));
        std::env::remove_var("DRIFTLESS_DATA_DIR");
        std::env::remove_var("DRIFTLESS_CACHE_MAX_ENTRIES");
    }

    #[test]
    fn test_snapshot_restore_on_new() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache_snapshot.json.gz");
        let config = CacheConfig {
            snapshot_path: Some(path),
            ..CacheConfig::default()
        };

        {
            let cache = ResultCache::new(config.clone());
            cache.put("fp1", Translation::new("hola", 0.9), ResultKind::Text);
            cache.save_snapshot();
        }

        let cache = ResultCache::new(config);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("fp1").unwrap().text, "hola");
    }
}

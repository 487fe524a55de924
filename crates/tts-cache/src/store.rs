//! The audio cache store: on-disk audio storage with an in-memory index,
//! LRU + TTL eviction, and atomic index persistence.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use tts_core::CacheKey;

use crate::entry::{CacheEntry, CacheStats, CacheStatsSnapshot, DEFAULT_TTL_SECONDS};
use crate::error::{CacheError, CacheResult};

/// Number of hash-prefix bucket directories created under `audio/`, one per
/// possible two-hex-digit prefix of a cache key hash (`00`..`ff`).
const BUCKET_COUNT: u16 = 256;

/// Default cache size ceiling: 2 GiB, matching the original default.
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 2 * 1024 * 1024 * 1024;

/// Save the index to disk every this many writes, to avoid serializing on
/// every single `put`.
const INDEX_SAVE_INTERVAL: usize = 10;

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    saved_at: chrono::DateTime<Utc>,
    entries: HashMap<String, CacheEntry>,
    stats: IndexStats,
}

#[derive(Serialize, Deserialize, Default)]
struct IndexStats {
    hits: u64,
    misses: u64,
    eviction_count: u64,
    prefetch_count: u64,
    prefetch_hits: u64,
}

struct Index {
    entries: HashMap<String, CacheEntry>,
    total_size_bytes: u64,
    entries_by_provider: HashMap<String, u64>,
}

impl Index {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            total_size_bytes: 0,
            entries_by_provider: HashMap::new(),
        }
    }

    fn insert(&mut self, hash: String, entry: CacheEntry) {
        if let Some(old) = self.entries.remove(&hash) {
            self.total_size_bytes = self.total_size_bytes.saturating_sub(old.size_bytes);
            self.decrement_provider(old.key.provider().id());
        }
        self.total_size_bytes += entry.size_bytes;
        self.increment_provider(entry.key.provider().id());
        self.entries.insert(hash, entry);
    }

    fn remove(&mut self, hash: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(hash)?;
        self.total_size_bytes = self.total_size_bytes.saturating_sub(entry.size_bytes);
        self.decrement_provider(entry.key.provider().id());
        Some(entry)
    }

    fn increment_provider(&mut self, provider: &str) {
        *self.entries_by_provider.entry(provider.to_string()).or_insert(0) += 1;
    }

    fn decrement_provider(&mut self, provider: &str) {
        if let Some(count) = self.entries_by_provider.get_mut(provider) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.entries_by_provider.remove(provider);
            }
        }
    }
}

/// Async, file-based audio cache with LRU eviction and TTL expiration.
///
/// The in-memory index is guarded by a single `tokio::sync::Mutex`; file
/// reads/writes and deletions happen outside that lock once the index has
/// been updated, so a slow disk never blocks unrelated index lookups.
pub struct AudioCacheStore {
    cache_dir: PathBuf,
    audio_dir: PathBuf,
    index_path: PathBuf,
    max_size_bytes: u64,
    default_ttl_seconds: i64,
    index: Mutex<Index>,
    stats: Arc<CacheStats>,
}

impl AudioCacheStore {
    /// Construct a store rooted at `cache_dir`. Call [`Self::initialize`]
    /// before first use to create directories and load any existing index.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, max_size_bytes: u64, default_ttl_days: i64) -> Self {
        let cache_dir = cache_dir.into();
        Self {
            audio_dir: cache_dir.join("audio"),
            index_path: cache_dir.join("index.json"),
            cache_dir,
            max_size_bytes,
            default_ttl_seconds: default_ttl_days * 24 * 60 * 60,
            index: Mutex::new(Index::new()),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// Construct a store with the default 2 GiB size ceiling and 30-day TTL.
    #[must_use]
    pub fn with_defaults(cache_dir: impl Into<PathBuf>) -> Self {
        Self::new(cache_dir, DEFAULT_MAX_SIZE_BYTES, 30)
    }

    /// Create directories, create bucket subdirectories, load the existing
    /// index if present, and evict anything already expired.
    pub async fn initialize(&self) -> CacheResult<()> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|e| CacheError::from_io_error(&e))?;
        tokio::fs::create_dir_all(&self.audio_dir)
            .await
            .map_err(|e| CacheError::from_io_error(&e))?;

        for i in 0..BUCKET_COUNT {
            let bucket = self.audio_dir.join(format!("{i:02x}"));
            tokio::fs::create_dir_all(&bucket)
                .await
                .map_err(|e| CacheError::from_io_error(&e))?;
        }

        self.load_index().await?;

        let expired = self.evict_expired().await?;
        if expired > 0 {
            info!(count = expired, "evicted expired TTS cache entries on startup");
        }

        let index = self.index.lock().await;
        info!(
            entries = index.entries.len(),
            total_size_bytes = index.total_size_bytes,
            "TTS cache ready"
        );
        Ok(())
    }

    /// Look up cached audio. Returns `None` on a miss or an expired/missing
    /// entry (which is evicted as a side effect).
    pub async fn get(&self, key: &CacheKey) -> CacheResult<Option<Vec<u8>>> {
        let hash = key.hash();
        let file_path = {
            let mut index = self.index.lock().await;
            let Some(entry) = index.entries.get(&hash) else {
                self.stats.record_miss();
                return Ok(None);
            };
            if entry.is_expired() {
                index.remove(&hash);
                drop(index);
                self.delete_file_best_effort(&hash_file_path(&self.audio_dir, &hash)).await;
                self.stats.record_miss();
                return Ok(None);
            }
            let path = PathBuf::from(&entry.file_path);
            if let Some(e) = index.entries.get_mut(&hash) {
                e.touch();
            }
            path
        };

        match tokio::fs::read(&file_path).await {
            Ok(data) => {
                self.stats.record_hit();
                Ok(Some(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let mut index = self.index.lock().await;
                index.remove(&hash);
                self.stats.record_miss();
                Ok(None)
            }
            Err(e) => {
                error!(path = %file_path.display(), error = %e, "failed to read cached audio");
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    /// Whether `key` has a live (non-expired) entry, without reading the
    /// audio file.
    pub async fn has(&self, key: &CacheKey) -> CacheResult<bool> {
        let hash = key.hash();
        let mut index = self.index.lock().await;
        let Some(entry) = index.entries.get(&hash) else {
            return Ok(false);
        };
        if entry.is_expired() {
            index.remove(&hash);
            return Ok(false);
        }
        Ok(true)
    }

    /// Store `audio_data` under `key`, replacing any existing entry.
    pub async fn put(
        &self,
        key: CacheKey,
        audio_data: &[u8],
        sample_rate: u32,
        duration_seconds: f64,
        ttl_days: Option<i64>,
    ) -> CacheResult<CacheEntry> {
        let hash = key.hash();
        let ttl_seconds = ttl_days.map_or(self.default_ttl_seconds, |d| d * 24 * 60 * 60);
        let file_path = hash_file_path(&self.audio_dir, &hash);

        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CacheError::from_io_error(&e))?;
        }
        tokio::fs::write(&file_path, audio_data)
            .await
            .map_err(|e| CacheError::from_io_error(&e))?;

        let now = Utc::now();
        let entry = CacheEntry {
            key,
            file_path: file_path.to_string_lossy().into_owned(),
            size_bytes: audio_data.len() as u64,
            sample_rate,
            duration_seconds,
            created_at: now,
            last_accessed_at: now,
            access_count: 1,
            ttl_seconds: if ttl_seconds == 0 { DEFAULT_TTL_SECONDS } else { ttl_seconds },
        };

        let should_save = {
            let mut index = self.index.lock().await;
            index.insert(hash.clone(), entry.clone());
            index.entries.len() % INDEX_SAVE_INTERVAL == 0
        };

        self.maybe_evict().await?;

        if should_save {
            if let Err(e) = self.save_index().await {
                error!(error = ?e, "failed to save TTS cache index");
            }
        }

        debug!(hash = %hash, bytes = audio_data.len(), "cached TTS audio");
        Ok(entry)
    }

    /// Remove an entry and its backing file. Returns `false` if not found.
    pub async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let hash = key.hash();
        let removed = {
            let mut index = self.index.lock().await;
            index.remove(&hash)
        };
        let Some(entry) = removed else {
            return Ok(false);
        };
        self.delete_file_best_effort(Path::new(&entry.file_path)).await;
        Ok(true)
    }

    /// Remove every expired entry. Returns the number removed.
    pub async fn evict_expired(&self) -> CacheResult<usize> {
        let removed_entries = {
            let mut index = self.index.lock().await;
            let expired: Vec<String> = index
                .entries
                .iter()
                .filter(|(_, e)| e.is_expired())
                .map(|(h, _)| h.clone())
                .collect();
            let mut removed = Vec::with_capacity(expired.len());
            for hash in expired {
                if let Some(entry) = index.remove(&hash) {
                    removed.push(entry);
                }
            }
            if !removed.is_empty() {
                self.stats.record_eviction(removed.len() as u64);
            }
            removed
        };

        for entry in &removed_entries {
            self.delete_file_best_effort(Path::new(&entry.file_path)).await;
        }

        if !removed_entries.is_empty() {
            self.save_index().await?;
            info!(count = removed_entries.len(), "evicted expired TTS cache entries");
        }
        Ok(removed_entries.len())
    }

    /// Evict least-recently-used entries until the cache is at or below
    /// `target_size_bytes` (default: 80% of the configured maximum).
    pub async fn evict_lru(&self, target_size_bytes: Option<u64>) -> CacheResult<usize> {
        let target = target_size_bytes.unwrap_or((self.max_size_bytes as f64 * 0.8) as u64);

        let removed_entries = {
            let mut index = self.index.lock().await;
            if index.total_size_bytes <= target {
                return Ok(0);
            }
            let mut ordered: Vec<(String, chrono::DateTime<Utc>)> = index
                .entries
                .iter()
                .map(|(h, e)| (h.clone(), e.last_accessed_at))
                .collect();
            ordered.sort_by_key(|(_, accessed)| *accessed);

            let mut removed = Vec::new();
            for (hash, _) in ordered {
                if index.total_size_bytes <= target {
                    break;
                }
                if let Some(entry) = index.remove(&hash) {
                    removed.push(entry);
                }
            }
            if !removed.is_empty() {
                self.stats.record_eviction(removed.len() as u64);
            }
            removed
        };

        for entry in &removed_entries {
            self.delete_file_best_effort(Path::new(&entry.file_path)).await;
        }

        if !removed_entries.is_empty() {
            self.save_index().await?;
            info!(count = removed_entries.len(), "LRU evicted TTS cache entries");
        }
        Ok(removed_entries.len())
    }

    /// Remove every entry and its backing file.
    pub async fn clear(&self) -> CacheResult<usize> {
        let removed_entries = {
            let mut index = self.index.lock().await;
            let hashes: Vec<String> = index.entries.keys().cloned().collect();
            let mut removed = Vec::with_capacity(hashes.len());
            for hash in hashes {
                if let Some(entry) = index.remove(&hash) {
                    removed.push(entry);
                }
            }
            removed
        };

        for entry in &removed_entries {
            self.delete_file_best_effort(Path::new(&entry.file_path)).await;
        }

        self.save_index().await?;
        info!(count = removed_entries.len(), "cleared TTS cache");
        Ok(removed_entries.len())
    }

    /// Snapshot current statistics.
    pub async fn stats(&self) -> CacheStatsSnapshot {
        let index = self.index.lock().await;
        self.stats.snapshot(
            index.entries.len(),
            index.total_size_bytes,
            self.max_size_bytes,
            index.entries_by_provider.clone(),
        )
    }

    /// Give the shared statistics handle to an external caller (e.g. the
    /// prefetcher) that records prefetch hit/miss outcomes directly.
    #[must_use]
    pub fn stats_handle(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Persist the index to disk atomically: write to a temp file in the
    /// same directory, then rename over the real index path.
    pub async fn save_index(&self) -> CacheResult<()> {
        let (entries, index_stats) = {
            let index = self.index.lock().await;
            (
                index.entries.clone(),
                IndexStats {
                    hits: self.stats.hits.load(std::sync::atomic::Ordering::Relaxed),
                    misses: self.stats.misses.load(std::sync::atomic::Ordering::Relaxed),
                    eviction_count: self
                        .stats
                        .eviction_count
                        .load(std::sync::atomic::Ordering::Relaxed),
                    prefetch_count: self
                        .stats
                        .prefetch_count
                        .load(std::sync::atomic::Ordering::Relaxed),
                    prefetch_hits: self
                        .stats
                        .prefetch_hits
                        .load(std::sync::atomic::Ordering::Relaxed),
                },
            )
        };

        let file = IndexFile {
            version: 1,
            saved_at: Utc::now(),
            entries,
            stats: index_stats,
        };

        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| CacheError::corrupt_index(e.to_string()))?;

        let temp_path = self.index_path.with_extension("tmp");
        tokio::fs::write(&temp_path, json)
            .await
            .map_err(|e| CacheError::from_io_error(&e))?;
        tokio::fs::rename(&temp_path, &self.index_path)
            .await
            .map_err(|e| CacheError::from_io_error(&e))?;

        debug!("saved TTS cache index");
        Ok(())
    }

    /// Save the index one last time on shutdown.
    pub async fn shutdown(&self) -> CacheResult<()> {
        self.save_index().await?;
        info!("TTS cache shutdown complete");
        Ok(())
    }

    async fn load_index(&self) -> CacheResult<()> {
        if !self.index_path.exists() {
            info!("no existing TTS cache index found");
            return Ok(());
        }

        let raw = match tokio::fs::read_to_string(&self.index_path).await {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "failed to read TTS cache index");
                return Ok(());
            }
        };

        let parsed: IndexFile = match serde_json::from_str(&raw) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "failed to parse TTS cache index");
                return Ok(());
            }
        };

        let mut index = self.index.lock().await;
        for (hash, entry) in parsed.entries {
            if Path::new(&entry.file_path).exists() {
                index.insert(hash, entry);
            } else {
                warn!(hash = %hash, "dropping cache index entry with missing file");
            }
        }

        self.stats.hits.store(parsed.stats.hits, std::sync::atomic::Ordering::Relaxed);
        self.stats.misses.store(parsed.stats.misses, std::sync::atomic::Ordering::Relaxed);
        self.stats
            .eviction_count
            .store(parsed.stats.eviction_count, std::sync::atomic::Ordering::Relaxed);
        self.stats
            .prefetch_count
            .store(parsed.stats.prefetch_count, std::sync::atomic::Ordering::Relaxed);
        self.stats
            .prefetch_hits
            .store(parsed.stats.prefetch_hits, std::sync::atomic::Ordering::Relaxed);

        info!(count = index.entries.len(), "loaded TTS cache index");
        Ok(())
    }

    async fn maybe_evict(&self) -> CacheResult<()> {
        let over_limit = {
            let index = self.index.lock().await;
            index.total_size_bytes > self.max_size_bytes
        };
        if over_limit {
            self.evict_lru(None).await?;
        }
        Ok(())
    }

    async fn delete_file_best_effort(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %path.display(), error = %e, "failed to delete cache file");
            }
        }
    }
}

fn hash_file_path(audio_dir: &Path, hash: &str) -> PathBuf {
    let prefix = &hash[..2.min(hash.len())];
    audio_dir.join(prefix).join(format!("{hash}.wav"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tts_core::Provider;

    fn key(text: &str) -> CacheKey {
        CacheKey::from_request(text, "v1", Provider::Piper, 1.0, None, None, None).unwrap()
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioCacheStore::with_defaults(dir.path());
        store.initialize().await.unwrap();

        let k = key("hello world");
        store.put(k.clone(), b"fake-audio", 22050, 1.5, None).await.unwrap();

        let data = store.get(&k).await.unwrap();
        assert_eq!(data, Some(b"fake-audio".to_vec()));
    }

    #[tokio::test]
    async fn miss_for_unknown_key_records_miss() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioCacheStore::with_defaults(dir.path());
        store.initialize().await.unwrap();

        let k = key("never cached");
        assert_eq!(store.get(&k).await.unwrap(), None);
        let stats = store.stats().await;
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_evicted_on_access() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioCacheStore::new(dir.path(), DEFAULT_MAX_SIZE_BYTES, 0);
        store.initialize().await.unwrap();

        let k = key("short lived");
        store.put(k.clone(), b"data", 22050, 1.0, Some(0)).await.unwrap();
        // ttl_days = 0 maps to the crate default (30 days) by construction,
        // so explicitly force an already-expired entry by overwriting ttl.
        {
            let hash = k.hash();
            let mut index = store.index.lock().await;
            if let Some(entry) = index.entries.get_mut(&hash) {
                entry.ttl_seconds = -1;
            }
        }
        assert_eq!(store.get(&k).await.unwrap(), None);
        assert!(!store.has(&k).await.unwrap());
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioCacheStore::with_defaults(dir.path());
        store.initialize().await.unwrap();

        let k = key("to delete");
        store.put(k.clone(), b"data", 22050, 1.0, None).await.unwrap();
        assert!(store.delete(&k).await.unwrap());
        assert!(!store.delete(&k).await.unwrap());
        assert_eq!(store.get(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn lru_eviction_respects_target_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioCacheStore::new(dir.path(), 1000, 30);
        store.initialize().await.unwrap();

        for i in 0..5 {
            let k = key(&format!("entry {i}"));
            store.put(k, vec![0u8; 100].as_slice(), 22050, 1.0, None).await.unwrap();
        }
        let removed = store.evict_lru(Some(200)).await.unwrap();
        assert!(removed > 0);
        let stats = store.stats().await;
        assert!(stats.total_size_bytes <= 200);
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = AudioCacheStore::with_defaults(dir.path());
        store.initialize().await.unwrap();

        store.put(key("a"), b"data", 22050, 1.0, None).await.unwrap();
        store.put(key("b"), b"data", 22050, 1.0, None).await.unwrap();
        let removed = store.clear().await.unwrap();
        assert_eq!(removed, 2);
        let stats = store.stats().await;
        assert_eq!(stats.total_entries, 0);
    }

    #[tokio::test]
    async fn index_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = AudioCacheStore::with_defaults(dir.path());
            store.initialize().await.unwrap();
            store.put(key("persisted"), b"data", 22050, 1.0, None).await.unwrap();
            store.save_index().await.unwrap();
        }
        let reopened = AudioCacheStore::with_defaults(dir.path());
        reopened.initialize().await.unwrap();
        assert!(reopened.has(&key("persisted")).await.unwrap());
    }
}

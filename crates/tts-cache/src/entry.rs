//! Cache entry and statistics types.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tts_core::CacheKey;

/// Default time-to-live for a cache entry, matching the original cache's
/// 30-day default.
pub const DEFAULT_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;

/// One stored piece of synthesized audio and its bookkeeping metadata.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    /// The key this entry was stored under.
    pub key: CacheKey,
    /// Absolute path to the audio file on disk.
    pub file_path: String,
    /// Size of the audio file in bytes.
    pub size_bytes: u64,
    /// Sample rate of the stored audio in Hz.
    pub sample_rate: u32,
    /// Estimated duration of the stored audio in seconds.
    pub duration_seconds: f64,
    /// When this entry was first written.
    pub created_at: DateTime<Utc>,
    /// When this entry was last read.
    pub last_accessed_at: DateTime<Utc>,
    /// Number of times this entry has been read (starts at 1 on write).
    pub access_count: u64,
    /// Time-to-live for this entry, in seconds from `created_at`.
    pub ttl_seconds: i64,
}

impl CacheEntry {
    /// Whether this entry has outlived its TTL.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        let age = Utc::now().signed_duration_since(self.created_at);
        age.num_seconds() > self.ttl_seconds
    }

    /// Age of this entry in seconds.
    #[must_use]
    pub fn age_seconds(&self) -> i64 {
        Utc::now().signed_duration_since(self.created_at).num_seconds()
    }

    /// Record a read: bump access count and refresh last-accessed time.
    pub fn touch(&mut self) {
        self.last_accessed_at = Utc::now();
        self.access_count += 1;
    }
}

/// Cumulative cache statistics.
///
/// Hit/miss/eviction/prefetch counters are lock-free atomics rather than
/// plain fields guarded by the store's index mutex: callers increment them
/// from code paths (e.g. after releasing the index lock to do file I/O)
/// that should not need to re-acquire it just to bump a counter.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub(crate) hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) eviction_count: AtomicU64,
    pub(crate) prefetch_count: AtomicU64,
    pub(crate) prefetch_hits: AtomicU64,
}

impl CacheStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self, count: u64) {
        self.eviction_count.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a prefetch-originated request; `hit` indicates whether it was
    /// already cached when the prefetcher looked it up.
    pub fn record_prefetch(&self, hit: bool) {
        self.prefetch_count.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.prefetch_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot the counters into a serializable report.
    #[must_use]
    pub fn snapshot(
        &self,
        total_entries: usize,
        total_size_bytes: u64,
        max_size_bytes: u64,
        entries_by_provider: HashMap<String, u64>,
    ) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            total_entries,
            total_size_bytes,
            max_size_bytes,
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
            eviction_count: self.eviction_count.load(Ordering::Relaxed),
            prefetch_count: self.prefetch_count.load(Ordering::Relaxed),
            prefetch_hits: self.prefetch_hits.load(Ordering::Relaxed),
            utilization_percent: if max_size_bytes == 0 {
                0.0
            } else {
                (total_size_bytes as f64 / max_size_bytes as f64) * 100.0
            },
            entries_by_provider,
        }
    }
}

/// A point-in-time, serializable view of [`CacheStats`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CacheStatsSnapshot {
    pub total_entries: usize,
    pub total_size_bytes: u64,
    pub max_size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub eviction_count: u64,
    pub prefetch_count: u64,
    pub prefetch_hits: u64,
    pub utilization_percent: f64,
    pub entries_by_provider: HashMap<String, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tts_core::Provider;

    fn key() -> CacheKey {
        CacheKey::from_request("hello", "v1", Provider::Piper, 1.0, None, None, None).unwrap()
    }

    #[test]
    fn expiry_is_based_on_ttl() {
        let mut entry = CacheEntry {
            key: key(),
            file_path: "x".to_string(),
            size_bytes: 10,
            sample_rate: 22050,
            duration_seconds: 1.0,
            created_at: Utc::now() - chrono::Duration::seconds(100),
            last_accessed_at: Utc::now(),
            access_count: 1,
            ttl_seconds: 50,
        };
        assert!(entry.is_expired());
        entry.ttl_seconds = 1000;
        assert!(!entry.is_expired());
    }

    #[test]
    fn touch_increments_access_count() {
        let mut entry = CacheEntry {
            key: key(),
            file_path: "x".to_string(),
            size_bytes: 10,
            sample_rate: 22050,
            duration_seconds: 1.0,
            created_at: Utc::now(),
            last_accessed_at: Utc::now(),
            access_count: 1,
            ttl_seconds: DEFAULT_TTL_SECONDS,
        };
        entry.touch();
        assert_eq!(entry.access_count, 2);
    }

    #[test]
    fn hit_rate_is_zero_with_no_requests() {
        let stats = CacheStats::default();
        let snap = stats.snapshot(0, 0, 0, HashMap::new());
        assert_eq!(snap.hit_rate, 0.0);
    }

    #[test]
    fn hit_rate_reflects_hits_and_misses() {
        let stats = CacheStats::default();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        let snap = stats.snapshot(0, 0, 0, HashMap::new());
        assert!((snap.hit_rate - (2.0 / 3.0)).abs() < 1e-9);
    }
}

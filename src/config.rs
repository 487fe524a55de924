//! Layered runtime configuration, populated from environment variables
//! with typed defaults for every tunable the process exposes.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Fully resolved configuration for one process. Built once at startup by
/// [`Settings::from_env`] and handed to `bootstrap`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Root directory for the audio cache (index + bucketed `.wav` files).
    pub cache_dir: PathBuf,
    /// Maximum total cache size in bytes before LRU eviction kicks in.
    pub cache_max_size_bytes: u64,
    /// Default TTL for new cache entries, in days.
    pub cache_default_ttl_days: i64,

    /// Base directory for knowledge-bowl module audio.
    pub kb_base_dir: PathBuf,
    /// Base directory for batch pre-generation job output.
    pub pregen_base_dir: PathBuf,
    /// Directory for profile sample-audio previews.
    pub profile_samples_dir: PathBuf,
    /// Base directory for comparison-session variant audio.
    pub comparison_base_dir: PathBuf,

    /// `SQLite` database file path.
    pub database_path: PathBuf,

    /// Maximum concurrent live-priority upstream requests.
    pub max_concurrent_live: usize,
    /// Maximum concurrent background (prefetch/scheduled) requests.
    pub max_concurrent_background: usize,
    /// Per-request upstream HTTP timeout.
    pub upstream_timeout: Duration,
    /// Delay between successive prefetch requests, for upstream rate
    /// limiting.
    pub prefetch_request_delay: Duration,

    /// Consecutive item failures before a pre-gen job auto-pauses.
    pub auto_pause_threshold: i64,
    /// Per-item retry attempt cap.
    pub retry_attempts: i64,

    /// Admin HTTP surface bind address, `host:port`.
    pub admin_bind_addr: String,
}

impl Settings {
    /// Build settings from environment variables (optionally loaded from
    /// a `.env` file by the caller via `dotenvy`), falling back to fixed
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let data_root = env_string_or("TTS_DATA_ROOT", "./data");

        Self {
            cache_dir: PathBuf::from(env_string_or("TTS_CACHE_DIR", &format!("{data_root}/cache"))),
            cache_max_size_bytes: env_or("TTS_CACHE_MAX_SIZE_BYTES", 2 * 1024 * 1024 * 1024),
            cache_default_ttl_days: env_or("TTS_CACHE_TTL_DAYS", 30),

            kb_base_dir: PathBuf::from(env_string_or("TTS_KB_BASE_DIR", &format!("{data_root}/kb_audio"))),
            pregen_base_dir: PathBuf::from(env_string_or("TTS_PREGEN_BASE_DIR", &format!("{data_root}/pregen"))),
            profile_samples_dir: PathBuf::from(env_string_or(
                "TTS_PROFILE_SAMPLES_DIR",
                &format!("{data_root}/profile_samples"),
            )),
            comparison_base_dir: PathBuf::from(env_string_or(
                "TTS_COMPARISON_BASE_DIR",
                &format!("{data_root}/comparisons"),
            )),

            database_path: PathBuf::from(env_string_or("TTS_DATABASE_PATH", &format!("{data_root}/tts_platform.db"))),

            max_concurrent_live: env_or("TTS_MAX_CONCURRENT_LIVE", 7),
            max_concurrent_background: env_or("TTS_MAX_CONCURRENT_BACKGROUND", 3),
            upstream_timeout: Duration::from_secs(env_or("TTS_UPSTREAM_TIMEOUT_SECS", 30)),
            prefetch_request_delay: Duration::from_millis(env_or("TTS_PREFETCH_DELAY_MS", 100)),

            auto_pause_threshold: env_or("TTS_AUTO_PAUSE_THRESHOLD", 5),
            retry_attempts: env_or("TTS_RETRY_ATTEMPTS", 3),

            admin_bind_addr: env_string_or("TTS_ADMIN_BIND_ADDR", "0.0.0.0:8090"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_env_falls_back_to_documented_defaults() {
        // SAFETY-ish in tests only: clear any leaked env from a prior test run.
        for key in [
            "TTS_CACHE_MAX_SIZE_BYTES",
            "TTS_CACHE_TTL_DAYS",
            "TTS_MAX_CONCURRENT_LIVE",
            "TTS_MAX_CONCURRENT_BACKGROUND",
        ] {
            std::env::remove_var(key);
        }
        let settings = Settings::from_env();
        assert_eq!(settings.cache_max_size_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(settings.cache_default_ttl_days, 30);
        assert_eq!(settings.max_concurrent_live, 7);
        assert_eq!(settings.max_concurrent_background, 3);
        assert_eq!(settings.auto_pause_threshold, 5);
        assert_eq!(settings.retry_attempts, 3);
    }
}

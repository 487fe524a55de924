//! Process-wiring composition root. This module is the ONLY place the
//! concrete implementations of every crate in the workspace are
//! instantiated and wired together; everything downstream (CLI handlers,
//! admin HTTP routes) receives the fully composed [`AppContext`].

use std::sync::Arc;

use anyhow::Result;
use fov_context::SessionManager;
use tts_cache::AudioCacheStore;
use tts_db::{setup_database, SqliteComparisonRepository, SqliteJobRepository, SqliteProfileRepository};
use tts_kb::KbAudioManager;
use tts_pool::{HttpTtsSynthesizer, TtsResourcePool};
use tts_pregen::{ComparisonManager, JobEngine, ProfileManager};
use tts_prefetch::CurriculumPrefetcher;

use crate::config::Settings;

/// Every long-lived service the process needs, composed once at startup
/// and shared (via `Arc`) across the CLI and the admin HTTP surface.
pub struct AppContext {
    pub settings: Settings,
    pub cache: Arc<AudioCacheStore>,
    pub pool: Arc<TtsResourcePool>,
    pub prefetcher: Arc<CurriculumPrefetcher>,
    pub kb_manager: Arc<KbAudioManager>,
    pub job_engine: Arc<JobEngine>,
    pub profile_manager: Arc<ProfileManager>,
    pub comparison_manager: Arc<ComparisonManager>,
    pub session_manager: Arc<SessionManager>,
}

/// Compose every service named in `settings`, creating on-disk directories
/// and the `SQLite` schema as needed. Safe to call once per process start;
/// idempotent on re-runs against the same data directory.
pub async fn bootstrap(settings: Settings) -> Result<AppContext> {
    let db_pool = setup_database(&settings.database_path).await?;

    let jobs = Arc::new(SqliteJobRepository::new(db_pool.clone()));
    let profiles = Arc::new(SqliteProfileRepository::new(db_pool.clone()));
    let comparisons = Arc::new(SqliteComparisonRepository::new(db_pool));

    let synthesizer = Arc::new(HttpTtsSynthesizer::new(settings.upstream_timeout));
    let pool = Arc::new(TtsResourcePool::new(
        synthesizer,
        settings.max_concurrent_live,
        settings.max_concurrent_background,
    ));

    let cache = Arc::new(AudioCacheStore::new(
        settings.cache_dir.clone(),
        settings.cache_max_size_bytes,
        settings.cache_default_ttl_days,
    ));
    cache.initialize().await?;

    let prefetcher = Arc::new(CurriculumPrefetcher::new(cache.clone(), pool.clone()));

    let kb_manager = Arc::new(KbAudioManager::new(settings.kb_base_dir.clone(), pool.clone()));
    kb_manager.initialize().await?;

    let job_engine = Arc::new(JobEngine::new(jobs, profiles.clone(), pool.clone(), settings.pregen_base_dir.clone()));
    let profile_manager =
        Arc::new(ProfileManager::new(profiles, pool.clone(), settings.profile_samples_dir.clone()));
    let comparison_manager =
        Arc::new(ComparisonManager::new(comparisons, pool.clone(), settings.comparison_base_dir.clone()));

    let session_manager = Arc::new(SessionManager::new());

    Ok(AppContext {
        settings,
        cache,
        pool,
        prefetcher,
        kb_manager,
        job_engine,
        profile_manager,
        comparison_manager,
        session_manager,
    })
}

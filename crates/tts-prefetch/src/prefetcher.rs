//! The background curriculum prefetcher.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tts_cache::AudioCacheStore;
use tts_core::{CacheKey, Priority, Provider};
use tts_pool::{ChatterboxConfig, SynthesisRequest, TtsResourcePool};

use crate::progress::{PrefetchProgress, PrefetchStatus};

/// Delay between successive requests within one `prefetch_topic` job, to
/// avoid hammering the upstream server even at background priority.
const DEFAULT_DELAY_BETWEEN_REQUESTS_MS: u64 = 100;

struct Job {
    handle: JoinHandle<()>,
    progress: Arc<Mutex<PrefetchProgress>>,
}

/// Predictive caching for curriculum TTS content.
///
/// Runs at most one active job per `(curriculum_id, topic_id)` pair;
/// starting a new job for a pair that already has one running cancels the
/// old job first. `prefetch_upcoming` is a separate, lighter-weight path
/// used during live playback: it fires independent per-segment tasks
/// rather than one job per call.
pub struct CurriculumPrefetcher {
    cache: Arc<AudioCacheStore>,
    pool: Arc<TtsResourcePool>,
    delay_between_requests_ms: u64,
    jobs: Mutex<HashMap<String, Job>>,
}

/// Parameters shared by a topic prefetch and a single upcoming-segment
/// prefetch: voice, provider, speed, and optional chatterbox tuning.
#[derive(Clone, Debug)]
pub struct PrefetchVoiceConfig {
    pub voice_id: String,
    pub provider: Provider,
    pub speed: f64,
    pub chatterbox_config: Option<ChatterboxConfig>,
}

impl CurriculumPrefetcher {
    /// Build a prefetcher against a shared cache and resource pool.
    #[must_use]
    pub fn new(cache: Arc<AudioCacheStore>, pool: Arc<TtsResourcePool>) -> Self {
        Self {
            cache,
            pool,
            delay_between_requests_ms: DEFAULT_DELAY_BETWEEN_REQUESTS_MS,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start a background prefetch job for every segment of a topic.
    /// Cancels and replaces any job already running for the same
    /// `(curriculum_id, topic_id)` pair. Returns the new job's id.
    pub async fn prefetch_topic(
        &self,
        curriculum_id: String,
        topic_id: String,
        segments: Vec<String>,
        config: PrefetchVoiceConfig,
    ) -> String {
        let job_id = format!("prefetch_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

        {
            let mut jobs = self.jobs.lock().await;
            let stale: Vec<String> = jobs
                .iter()
                .filter(|(_, job)| {
                    let p = job.progress.try_lock();
                    p.map(|p| p.curriculum_id == curriculum_id && p.topic_id == topic_id)
                        .unwrap_or(false)
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in stale {
                if let Some(job) = jobs.remove(&id) {
                    job.handle.abort();
                }
            }
        }

        let progress = Arc::new(Mutex::new(PrefetchProgress::new(
            job_id.clone(),
            curriculum_id.clone(),
            topic_id.clone(),
            segments.len(),
        )));

        let cache = Arc::clone(&self.cache);
        let pool = Arc::clone(&self.pool);
        let progress_for_task = Arc::clone(&progress);
        let delay_ms = self.delay_between_requests_ms;
        let job_id_for_log = job_id.clone();

        let handle = tokio::spawn(async move {
            run_segments(cache, pool, progress_for_task, segments, config, delay_ms).await;
            info!(job_id = %job_id_for_log, "prefetch job finished");
        });

        self.jobs.lock().await.insert(job_id.clone(), Job { handle, progress });

        info!(job_id = %job_id, %curriculum_id, %topic_id, "started prefetch job");
        job_id
    }

    /// Fire-and-forget prefetch of the next `lookahead` segments past
    /// `current_index`, for real-time prefetching during playback. Segments
    /// already cached are skipped without spawning a task.
    pub async fn prefetch_upcoming(
        &self,
        current_index: usize,
        segments: &[String],
        lookahead: usize,
        config: PrefetchVoiceConfig,
    ) {
        let start = current_index + 1;
        let end = (start + lookahead).min(segments.len());
        if start >= end {
            return;
        }

        for text in &segments[start..end] {
            let cache = Arc::clone(&self.cache);
            let pool = Arc::clone(&self.pool);
            let text = text.clone();
            let config = config.clone();
            tokio::spawn(async move {
                prefetch_single(&cache, &pool, &text, &config).await;
            });
        }
    }

    /// Cancel a running job. Returns `false` if no job with that id exists.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.get(job_id) else {
            return false;
        };
        job.handle.abort();
        let mut progress = job.progress.lock().await;
        progress.status = PrefetchStatus::Cancelled;
        progress.completed_at = Some(Utc::now());
        info!(%job_id, "cancelled prefetch job");
        true
    }

    /// Snapshot progress for one job.
    pub async fn progress(&self, job_id: &str) -> Option<PrefetchProgress> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(job_id)?;
        Some(job.progress.lock().await.clone())
    }

    /// Snapshot progress for every tracked job.
    pub async fn all_jobs(&self) -> Vec<PrefetchProgress> {
        let jobs = self.jobs.lock().await;
        let mut out = Vec::with_capacity(jobs.len());
        for job in jobs.values() {
            out.push(job.progress.lock().await.clone());
        }
        out
    }

    /// Drop completed/cancelled/failed jobs older than `max_age_seconds`.
    /// Returns the number removed.
    pub async fn cleanup_completed_jobs(&self, max_age_seconds: i64) -> usize {
        let mut jobs = self.jobs.lock().await;
        let now = Utc::now();
        let mut to_remove = Vec::new();

        for (id, job) in jobs.iter() {
            let progress = job.progress.lock().await;
            if progress.status.is_terminal() {
                if let Some(completed_at) = progress.completed_at {
                    if (now - completed_at).num_seconds() > max_age_seconds {
                        to_remove.push(id.clone());
                    }
                }
            }
        }

        let removed = to_remove.len();
        for id in to_remove {
            jobs.remove(&id);
        }
        removed
    }
}

async fn run_segments(
    cache: Arc<AudioCacheStore>,
    pool: Arc<TtsResourcePool>,
    progress: Arc<Mutex<PrefetchProgress>>,
    segments: Vec<String>,
    config: PrefetchVoiceConfig,
    delay_ms: u64,
) {
    {
        let mut p = progress.lock().await;
        p.status = PrefetchStatus::InProgress;
        p.started_at = Some(Utc::now());
    }

    for text in &segments {
        {
            let p = progress.lock().await;
            if p.status == PrefetchStatus::Cancelled {
                break;
            }
        }

        let outcome = prefetch_single(&cache, &pool, text, &config).await;
        let mut p = progress.lock().await;
        match outcome {
            SegmentOutcome::AlreadyCached => {
                p.cached += 1;
                p.completed += 1;
            }
            SegmentOutcome::Generated => {
                p.generated += 1;
                p.completed += 1;
            }
            SegmentOutcome::Failed => {
                p.failed += 1;
                p.completed += 1;
            }
        }
        drop(p);

        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
    }

    let mut p = progress.lock().await;
    if p.status != PrefetchStatus::Cancelled {
        p.status = if p.failed == 0 {
            PrefetchStatus::Completed
        } else {
            PrefetchStatus::CompletedWithErrors
        };
    }
    p.completed_at = Some(Utc::now());
    info!(
        job_id = %p.job_id,
        generated = p.generated,
        cached = p.cached,
        failed = p.failed,
        "prefetch job complete"
    );
}

enum SegmentOutcome {
    AlreadyCached,
    Generated,
    Failed,
}

async fn prefetch_single(
    cache: &AudioCacheStore,
    pool: &TtsResourcePool,
    text: &str,
    config: &PrefetchVoiceConfig,
) -> SegmentOutcome {
    let key = match CacheKey::from_request(
        text,
        config.voice_id.clone(),
        config.provider,
        config.speed,
        config.chatterbox_config.as_ref().and_then(|c| c.exaggeration),
        config.chatterbox_config.as_ref().and_then(|c| c.cfg_weight),
        config.chatterbox_config.as_ref().and_then(|c| c.language.clone()),
    ) {
        Ok(k) => k,
        Err(e) => {
            warn!(error = %e, "skipping prefetch segment with invalid cache key");
            return SegmentOutcome::Failed;
        }
    };

    match cache.has(&key).await {
        Ok(true) => return SegmentOutcome::AlreadyCached,
        Ok(false) => {}
        Err(e) => {
            warn!(error = ?e, "cache lookup failed during prefetch");
            return SegmentOutcome::Failed;
        }
    }

    let request = SynthesisRequest {
        text: text.to_string(),
        voice_id: config.voice_id.clone(),
        provider: config.provider,
        speed: config.speed,
        chatterbox_config: config.chatterbox_config.clone(),
    };

    match pool.generate_with_priority(request, Priority::Prefetch).await {
        Ok(result) => {
            if let Err(e) = cache
                .put(key, &result.audio_data, result.sample_rate, result.duration_seconds, None)
                .await
            {
                warn!(error = ?e, "failed to store prefetched audio");
                return SegmentOutcome::Failed;
            }
            cache.stats_handle().record_prefetch(false);
            SegmentOutcome::Generated
        }
        Err(e) => {
            warn!(error = %e, "prefetch generation failed for segment");
            SegmentOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tts_pool::{GenerationResult, PoolResult, TtsSynthesizer};

    struct FakeSynthesizer;

    #[async_trait]
    impl TtsSynthesizer for FakeSynthesizer {
        async fn synthesize(&self, _request: &SynthesisRequest) -> PoolResult<GenerationResult> {
            Ok(GenerationResult {
                audio_data: vec![0u8; 44 + 200],
                sample_rate: 22050,
                duration_seconds: 0.0,
            })
        }
    }

    fn config() -> PrefetchVoiceConfig {
        PrefetchVoiceConfig {
            voice_id: "nova".to_string(),
            provider: Provider::Vibevoice,
            speed: 1.0,
            chatterbox_config: None,
        }
    }

    async fn setup() -> (Arc<AudioCacheStore>, Arc<TtsResourcePool>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(AudioCacheStore::with_defaults(dir.path()));
        cache.initialize().await.unwrap();
        let pool = Arc::new(TtsResourcePool::with_defaults(Arc::new(FakeSynthesizer)));
        (cache, pool, dir)
    }

    #[tokio::test]
    async fn prefetch_topic_generates_all_segments() {
        let (cache, pool, _dir) = setup().await;
        let prefetcher = CurriculumPrefetcher::new(Arc::clone(&cache), pool);

        let job_id = prefetcher
            .prefetch_topic(
                "curr1".to_string(),
                "topic1".to_string(),
                vec!["seg one".to_string(), "seg two".to_string()],
                config(),
            )
            .await;

        for _ in 0..50 {
            if let Some(p) = prefetcher.progress(&job_id).await {
                if p.status.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let progress = prefetcher.progress(&job_id).await.unwrap();
        assert_eq!(progress.status, PrefetchStatus::Completed);
        assert_eq!(progress.generated, 2);
    }

    #[tokio::test]
    async fn starting_new_job_for_same_topic_cancels_old_one() {
        let (cache, pool, _dir) = setup().await;
        let prefetcher = CurriculumPrefetcher::new(cache, pool);

        let first = prefetcher
            .prefetch_topic(
                "curr1".to_string(),
                "topic1".to_string(),
                vec!["a".to_string(), "b".to_string(), "c".to_string()],
                config(),
            )
            .await;
        let _second = prefetcher
            .prefetch_topic(
                "curr1".to_string(),
                "topic1".to_string(),
                vec!["x".to_string()],
                config(),
            )
            .await;

        assert!(prefetcher.progress(&first).await.is_none());
    }

    #[tokio::test]
    async fn prefetch_upcoming_skips_already_cached_segments() {
        let (cache, pool, _dir) = setup().await;
        let key = CacheKey::from_request("already there", "nova", Provider::Vibevoice, 1.0, None, None, None)
            .unwrap();
        cache.put(key, b"data", 22050, 1.0, None).await.unwrap();

        let prefetcher = CurriculumPrefetcher::new(cache, pool);
        let segments = vec!["already there".to_string(), "new one".to_string()];
        prefetcher.prefetch_upcoming(0, &segments, 5, config()).await;

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn cleanup_removes_old_terminal_jobs() {
        let (cache, pool, _dir) = setup().await;
        let prefetcher = CurriculumPrefetcher::new(cache, pool);

        let job_id = prefetcher
            .prefetch_topic("c".to_string(), "t".to_string(), vec!["one".to_string()], config())
            .await;

        for _ in 0..50 {
            if let Some(p) = prefetcher.progress(&job_id).await {
                if p.status.is_terminal() {
                    break;
                }
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }

        let removed = prefetcher.cleanup_completed_jobs(-1).await;
        assert_eq!(removed, 1);
        assert!(prefetcher.progress(&job_id).await.is_none());
    }
}

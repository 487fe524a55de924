//! Durable batch TTS generation: lifecycle, per-item retry with backoff,
//! and starvation-safe scheduling.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tts_core::Priority;
use tts_db::{Job, JobItem, JobItemStatus, JobRepository, JobStatus, JobType, NewJob, NewJobItem, ProfileRepository, TtsConfig};
use tts_pool::{ChatterboxConfig, SynthesisRequest, TtsResourcePool};

use crate::error::{PregenError, PregenResult};
use crate::path_guard::{is_safe_subdir, resolve_within_base};

/// Job auto-pauses once this many consecutive item failures accumulate.
const AUTO_PAUSE_THRESHOLD: i64 = 5;
/// Per-item attempt cap.
const MAX_ATTEMPTS: i64 = 3;
/// Backoff sleep (seconds) indexed by `attempt_count - 1` of the attempt
/// that just failed. The engine never reaches the third entry at
/// `MAX_ATTEMPTS = 3` (the final attempt does not retry), but the table is
/// kept at its full literal width.
const RETRY_BACKOFF_SECONDS: [u64; 3] = [5, 15, 45];
/// Items fetched per iteration of the drain loop.
const ITEMS_PER_BATCH: i64 = 10;

/// Everything needed to create a new batch job.
#[derive(Clone, Debug)]
pub struct NewJobRequest {
    pub name: String,
    pub source_type: String,
    pub items: Vec<NewJobItem>,
    pub profile_id: Option<String>,
    pub tts_config: Option<TtsConfig>,
    /// Output directory, relative to the engine's configured base directory.
    pub output_subdir: String,
}

struct RunningJob {
    handle: JoinHandle<()>,
}

/// Orchestrates durable batch TTS generation jobs: creation, lifecycle
/// transitions, and the per-job drain loop that calls [`TtsResourcePool`]
/// at [`Priority::Scheduled`].
pub struct JobEngine {
    jobs: Arc<dyn JobRepository>,
    profiles: Arc<dyn ProfileRepository>,
    pool: Arc<TtsResourcePool>,
    base_dir: PathBuf,
    running: Arc<Mutex<HashMap<String, RunningJob>>>,
    retry_backoff_seconds: [u64; 3],
}

impl JobEngine {
    /// Build an engine rooted at `base_dir`; every job's output directory
    /// must resolve underneath it.
    #[must_use]
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        profiles: Arc<dyn ProfileRepository>,
        pool: Arc<TtsResourcePool>,
        base_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            jobs,
            profiles,
            pool,
            base_dir: base_dir.into(),
            running: Arc::new(Mutex::new(HashMap::new())),
            retry_backoff_seconds: RETRY_BACKOFF_SECONDS,
        }
    }

    /// Override the per-item retry backoff schedule, e.g. to shrink it for
    /// tests that need to exercise several attempts quickly.
    #[must_use]
    pub fn with_retry_backoff(mut self, schedule: [u64; 3]) -> Self {
        self.retry_backoff_seconds = schedule;
        self
    }

    /// Create a new batch job and its item backlog, in `pending` state.
    pub async fn create_job(&self, request: NewJobRequest) -> PregenResult<Job> {
        if !is_safe_subdir(&request.output_subdir) {
            return Err(PregenError::path_traversal(request.output_subdir));
        }
        let output_dir = self.base_dir.join(&request.output_subdir);
        let new_job = NewJob {
            name: request.name,
            job_type: JobType::Batch,
            source_type: request.source_type,
            profile_id: request.profile_id,
            tts_config: request.tts_config,
            output_dir: output_dir.to_string_lossy().into_owned(),
            items: request.items,
        };
        Ok(self.jobs.create_job(new_job).await?)
    }

    /// Fetch one job by id.
    pub async fn get_job(&self, job_id: &str) -> PregenResult<Job> {
        Ok(self.jobs.get_job(job_id).await?)
    }

    /// List every job, most recently created first.
    pub async fn list_jobs(&self) -> PregenResult<Vec<Job>> {
        Ok(self.jobs.list_jobs().await?)
    }

    /// Start a `pending` job's drain loop.
    pub async fn start_job(&self, job_id: &str) -> PregenResult<()> {
        let job = self.jobs.get_job(job_id).await?;
        if job.status != JobStatus::Pending {
            return Err(PregenError::policy_violation(format!(
                "job '{job_id}' is not pending (status is {:?})",
                job.status
            )));
        }
        self.spawn_run(job).await
    }

    /// Resume a `paused` or `failed` job.
    pub async fn resume_job(&self, job_id: &str) -> PregenResult<()> {
        let job = self.jobs.get_job(job_id).await?;
        if !job.resumable() {
            return Err(PregenError::policy_violation(format!(
                "job '{job_id}' is not resumable (status is {:?})",
                job.status
            )));
        }
        self.spawn_run(job).await
    }

    async fn spawn_run(&self, job: Job) -> PregenResult<()> {
        let job_id = job.id.clone();
        let mut running = self.running.lock().await;
        if running.contains_key(&job_id) {
            return Err(PregenError::policy_violation(format!("job '{job_id}' is already running")));
        }

        let jobs_repo = Arc::clone(&self.jobs);
        let profiles_repo = Arc::clone(&self.profiles);
        let pool = Arc::clone(&self.pool);
        let running_map = Arc::clone(&self.running);
        let job_id_for_log = job_id.clone();
        let backoff = self.retry_backoff_seconds;

        let handle = tokio::spawn(async move {
            run_job_loop(job, jobs_repo, profiles_repo, pool, backoff).await;
            running_map.lock().await.remove(&job_id_for_log);
            info!(job_id = %job_id_for_log, "pre-gen job loop exited");
        });

        running.insert(job_id.clone(), RunningJob { handle });
        info!(job_id = %job_id, "started pre-gen job");
        Ok(())
    }

    /// Pause a running job. The loop's task is aborted between items; any
    /// item already marked `processing` stays that way and is picked back
    /// up as `pending` work is re-fetched on resume (its row is left as-is,
    /// so a subsequent `fetch_pending_items` call simply will not return it
    /// until an operator retries it via `retry_failed_items`).
    pub async fn pause_job(&self, job_id: &str) -> PregenResult<()> {
        let removed = self.running.lock().await.remove(job_id);
        let Some(running_job) = removed else {
            return Err(PregenError::policy_violation(format!("job '{job_id}' is not running")));
        };
        running_job.handle.abort();

        let mut job = self.jobs.get_job(job_id).await?;
        job.status = JobStatus::Paused;
        job.paused_at = Some(Utc::now());
        self.jobs.update_job(&job).await?;
        info!(job_id, "paused pre-gen job");
        Ok(())
    }

    /// Cancel a job in any non-terminal state.
    pub async fn cancel_job(&self, job_id: &str) -> PregenResult<()> {
        if let Some(running_job) = self.running.lock().await.remove(job_id) {
            running_job.handle.abort();
        }

        let mut job = self.jobs.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(PregenError::policy_violation(format!("job '{job_id}' has already finished")));
        }
        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        self.jobs.update_job(&job).await?;
        info!(job_id, "cancelled pre-gen job");
        Ok(())
    }

    /// Cancel if running, delete the job and its items, and remove the
    /// job's output directory — after verifying it still resolves inside
    /// the engine's base directory.
    pub async fn delete_job(&self, job_id: &str) -> PregenResult<()> {
        let job = self.jobs.get_job(job_id).await?;
        if !job.status.is_terminal() {
            let _ = self.cancel_job(job_id).await;
        }

        let resolved_dir = resolve_within_base(&self.base_dir, &job.output_dir);

        self.jobs.delete_job(job_id).await?;

        match resolved_dir {
            Some(dir) => {
                if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                    warn!(job_id, error = %e, "failed to remove job output directory");
                }
            }
            None => warn!(job_id, output_dir = %job.output_dir, "job output directory rejected by path guard, not removed"),
        }
        Ok(())
    }

    /// Reset every `failed` item of a job back to `pending`.
    pub async fn retry_failed_items(&self, job_id: &str) -> PregenResult<i64> {
        Ok(self.jobs.retry_failed_items(job_id).await?)
    }

    /// Estimate remaining time to completion from the job's observed
    /// throughput (`completedItems / elapsedSeconds`). `None` until the job
    /// has started and completed at least one item.
    #[must_use]
    pub fn estimated_remaining_seconds(job: &Job) -> Option<f64> {
        let started_at = job.started_at?;
        if job.completed == 0 {
            return None;
        }
        let elapsed = (Utc::now() - started_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return None;
        }
        let rate = job.completed as f64 / elapsed;
        if rate <= 0.0 {
            return None;
        }
        Some(job.pending() as f64 / rate)
    }
}

async fn resolve_effective_config(job: &Job, profiles: &dyn ProfileRepository) -> PregenResult<TtsConfig> {
    if let Some(profile_id) = &job.profile_id {
        match profiles.get(profile_id).await {
            Ok(profile) => return Ok(profile.to_tts_config()),
            Err(e) => {
                warn!(job_id = %job.id, profile_id, error = %e, "profile missing at runtime, falling back to inline config");
            }
        }
    }
    job.tts_config
        .clone()
        .ok_or_else(|| PregenError::policy_violation("job has neither a resolvable profile nor an inline tts_config"))
}

async fn run_job_loop(
    mut job: Job,
    jobs_repo: Arc<dyn JobRepository>,
    profiles_repo: Arc<dyn ProfileRepository>,
    pool: Arc<TtsResourcePool>,
    retry_backoff_seconds: [u64; 3],
) {
    let job_id = job.id.clone();

    if job.started_at.is_none() {
        job.started_at = Some(Utc::now());
    }
    job.status = JobStatus::Running;
    if let Err(e) = jobs_repo.update_job(&job).await {
        error!(job_id = %job_id, error = %e, "failed to mark job running");
        return;
    }

    let config = match resolve_effective_config(&job, profiles_repo.as_ref()).await {
        Ok(c) => c,
        Err(e) => {
            fail_job(&mut job, &jobs_repo, e.to_string()).await;
            return;
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(&job.output_dir).await {
        fail_job(&mut job, &jobs_repo, e.to_string()).await;
        return;
    }

    loop {
        let items = match jobs_repo.fetch_pending_items(&job_id, ITEMS_PER_BATCH).await {
            Ok(items) => items,
            Err(e) => {
                fail_job(&mut job, &jobs_repo, e.to_string()).await;
                return;
            }
        };

        if items.is_empty() {
            job.status = JobStatus::Completed;
            job.completed_at = Some(Utc::now());
            job.current_text = None;
            let _ = jobs_repo.update_job(&job).await;
            info!(job_id = %job_id, "pre-gen job completed");
            return;
        }

        for item in items {
            job.current_index = item.item_index;
            job.current_text = Some(item.text.clone());
            let _ = jobs_repo.update_job(&job).await;

            let success = process_item(
                item,
                &config,
                &job.output_dir,
                pool.as_ref(),
                jobs_repo.as_ref(),
                retry_backoff_seconds,
            )
            .await;

            if success {
                job.completed += 1;
                job.consecutive_failures = 0;
            } else {
                job.failed += 1;
                job.consecutive_failures += 1;
            }
            let _ = jobs_repo.update_job(&job).await;

            if job.consecutive_failures >= AUTO_PAUSE_THRESHOLD {
                job.status = JobStatus::Paused;
                job.paused_at = Some(Utc::now());
                let _ = jobs_repo.update_job(&job).await;
                warn!(job_id = %job_id, "auto-paused after consecutive failures");
                return;
            }
        }
    }
}

async fn fail_job(job: &mut Job, jobs_repo: &Arc<dyn JobRepository>, error_message: String) {
    job.status = JobStatus::Failed;
    job.last_error = Some(error_message.clone());
    job.completed_at = Some(Utc::now());
    let _ = jobs_repo.update_job(job).await;
    error!(job_id = %job.id, error = %error_message, "pre-gen job failed");
}

fn synthesis_request(text: String, config: &TtsConfig) -> SynthesisRequest {
    SynthesisRequest {
        text,
        voice_id: config.voice_id.clone(),
        provider: config.provider,
        speed: config.settings.speed,
        chatterbox_config: config.provider.supports_chatterbox_fields().then(|| ChatterboxConfig {
            exaggeration: config.settings.exaggeration,
            cfg_weight: config.settings.cfg_weight,
            language: config.settings.language.clone(),
        }),
    }
}

/// Write the audio for `item`, retrying up to [`MAX_ATTEMPTS`] times with
/// `retry_backoff_seconds` as the backoff schedule. Returns whether the
/// item ultimately succeeded.
async fn process_item(
    mut item: JobItem,
    config: &TtsConfig,
    output_dir: &str,
    pool: &TtsResourcePool,
    jobs_repo: &dyn JobRepository,
    retry_backoff_seconds: [u64; 3],
) -> bool {
    item.status = JobItemStatus::Processing;
    item.processing_started_at = Some(Utc::now());
    item.attempt_count += 1;
    let _ = jobs_repo.update_item(&item).await;

    loop {
        let request = synthesis_request(item.text.clone(), config);

        let outcome = match pool.generate_with_priority(request, Priority::Scheduled).await {
            Ok(result) => {
                let hash_prefix = &item.text_hash[..item.text_hash.len().min(8)];
                let filename = format!("{:05}_{hash_prefix}.wav", item.item_index);
                let file_path = Path::new(output_dir).join(&filename);
                match tokio::fs::write(&file_path, &result.audio_data).await {
                    Ok(()) => {
                        item.output_file = Some(file_path.to_string_lossy().into_owned());
                        item.duration_seconds = Some(result.duration_seconds);
                        item.file_size_bytes = Some(result.audio_data.len() as i64);
                        item.sample_rate = Some(i64::from(result.sample_rate));
                        item.last_error = None;
                        Ok(())
                    }
                    Err(e) => Err(e.to_string()),
                }
            }
            Err(e) => Err(e.to_string()),
        };

        if let Err(message) = outcome {
            warn!(item_id = %item.id, error = %message, "job item attempt failed");
            item.last_error = Some(message);
        } else {
            item.status = JobItemStatus::Completed;
            item.processing_completed_at = Some(Utc::now());
            let _ = jobs_repo.update_item(&item).await;
            return true;
        }

        if item.attempt_count >= MAX_ATTEMPTS {
            item.status = JobItemStatus::Failed;
            item.processing_completed_at = Some(Utc::now());
            let _ = jobs_repo.update_item(&item).await;
            return false;
        }

        let delay = retry_backoff_seconds[(item.attempt_count - 1) as usize];
        item.attempt_count += 1;
        let _ = jobs_repo.update_item(&item).await;
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tts_db::{setup_test_database, SqliteJobRepository, SqliteProfileRepository, VoiceSettings};
    use tts_pool::{GenerationResult, PoolError, PoolResult, TtsSynthesizer};
    use tts_core::Provider;

    struct AlwaysSucceeds;

    #[async_trait]
    impl TtsSynthesizer for AlwaysSucceeds {
        async fn synthesize(&self, _request: &SynthesisRequest) -> PoolResult<GenerationResult> {
            Ok(GenerationResult { audio_data: vec![0u8; 60], sample_rate: 22050, duration_seconds: 0.5 })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl TtsSynthesizer for AlwaysFails {
        async fn synthesize(&self, _request: &SynthesisRequest) -> PoolResult<GenerationResult> {
            Err(PoolError::connection("synthesis unavailable"))
        }
    }

    struct FailsNTimes {
        remaining: AtomicUsize,
    }

    #[async_trait]
    impl TtsSynthesizer for FailsNTimes {
        async fn synthesize(&self, _request: &SynthesisRequest) -> PoolResult<GenerationResult> {
            if self.remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(PoolError::connection("transient failure"))
            } else {
                Ok(GenerationResult { audio_data: vec![0u8; 60], sample_rate: 22050, duration_seconds: 0.5 })
            }
        }
    }

    async fn engine(synth: Arc<dyn TtsSynthesizer>, base_dir: &Path) -> JobEngine {
        let pool_db = setup_test_database().await.unwrap();
        let jobs: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool_db.clone()));
        let profiles: Arc<dyn ProfileRepository> = Arc::new(SqliteProfileRepository::new(pool_db));
        let pool = Arc::new(TtsResourcePool::with_defaults(synth));
        JobEngine::new(jobs, profiles, pool, base_dir)
    }

    fn request(items: usize, output_subdir: &str) -> NewJobRequest {
        NewJobRequest {
            name: "batch".to_string(),
            source_type: "curriculum".to_string(),
            items: (0..items).map(|i| NewJobItem { text: format!("line {i}"), source_ref: None }).collect(),
            profile_id: None,
            tts_config: Some(TtsConfig {
                provider: Provider::Piper,
                voice_id: "nova".to_string(),
                settings: VoiceSettings::at_speed(1.0),
            }),
            output_subdir: output_subdir.to_string(),
        }
    }

    async fn wait_for_terminal(engine: &JobEngine, job_id: &str) -> Job {
        for _ in 0..100 {
            let job = engine.get_job(job_id).await.unwrap();
            if job.status.is_terminal() || job.status == JobStatus::Paused {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        engine.get_job(job_id).await.unwrap()
    }

    #[tokio::test]
    async fn create_job_rejects_traversal_in_output_subdir() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(AlwaysSucceeds), dir.path()).await;
        let err = engine.create_job(request(1, "../escape")).await.unwrap_err();
        assert!(matches!(err, PregenError::PathTraversal { .. }));
    }

    #[tokio::test]
    async fn successful_job_completes_and_writes_files() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(AlwaysSucceeds), dir.path()).await;
        let job = engine.create_job(request(3, "job-a")).await.unwrap();
        engine.start_job(&job.id).await.unwrap();

        let finished = wait_for_terminal(&engine, &job.id).await;
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.completed, 3);
        assert_eq!(finished.failed, 0);

        let mut entries = tokio::fs::read_dir(dir.path().join("job-a")).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn starting_a_running_job_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(AlwaysSucceeds), dir.path()).await;
        let job = engine.create_job(request(1, "job-b")).await.unwrap();
        engine.start_job(&job.id).await.unwrap();
        let err = engine.start_job(&job.id).await.unwrap_err();
        assert!(err.is_policy_violation());
        wait_for_terminal(&engine, &job.id).await;
    }

    #[tokio::test]
    async fn auto_pauses_after_five_consecutive_failures() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(AlwaysFails), dir.path()).await.with_retry_backoff([0, 0, 0]);
        let job = engine.create_job(request(6, "job-c")).await.unwrap();
        engine.start_job(&job.id).await.unwrap();

        let finished = wait_for_terminal(&engine, &job.id).await;
        assert_eq!(finished.status, JobStatus::Paused);
        assert_eq!(finished.consecutive_failures, 5);
        assert_eq!(finished.failed, 5);
    }

    #[tokio::test]
    async fn auto_paused_job_frees_its_running_slot_and_is_resumable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(AlwaysFails), dir.path()).await.with_retry_backoff([0, 0, 0]);
        let job = engine.create_job(request(6, "job-resume")).await.unwrap();
        engine.start_job(&job.id).await.unwrap();

        let paused = wait_for_terminal(&engine, &job.id).await;
        assert_eq!(paused.status, JobStatus::Paused);

        // The loop task's own cleanup, not an explicit pause_job call, must
        // have vacated the running slot; otherwise this returns a policy
        // violation claiming the job is still running.
        engine.resume_job(&job.id).await.unwrap();

        let paused_again = wait_for_terminal(&engine, &job.id).await;
        assert_eq!(paused_again.status, JobStatus::Paused);
    }

    #[tokio::test]
    async fn item_succeeds_after_transient_failures_within_attempt_budget() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(FailsNTimes { remaining: AtomicUsize::new(1) });
        let engine = engine(synth, dir.path()).await;
        let job = engine.create_job(request(1, "job-d")).await.unwrap();
        engine.start_job(&job.id).await.unwrap();

        // One transient failure means one 5s backoff sleep before success;
        // allow enough polling time for it to resolve.
        let mut finished = engine.get_job(&job.id).await.unwrap();
        for _ in 0..400 {
            finished = engine.get_job(&job.id).await.unwrap();
            if finished.status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.completed, 1);
    }

    #[tokio::test]
    async fn cancel_job_marks_cancelled_and_is_idempotent_error_on_repeat() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(AlwaysSucceeds), dir.path()).await;
        let job = engine.create_job(request(1, "job-e")).await.unwrap();
        engine.cancel_job(&job.id).await.unwrap();
        let cancelled = engine.get_job(&job.id).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(engine.cancel_job(&job.id).await.unwrap_err().is_policy_violation());
    }

    #[tokio::test]
    async fn pending_job_not_yet_running_cannot_be_paused() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(AlwaysSucceeds), dir.path()).await;
        let job = engine.create_job(request(1, "job-f")).await.unwrap();
        let err = engine.pause_job(&job.id).await.unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[tokio::test]
    async fn delete_job_removes_output_directory() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(Arc::new(AlwaysSucceeds), dir.path()).await;
        let job = engine.create_job(request(2, "job-g")).await.unwrap();
        engine.start_job(&job.id).await.unwrap();
        wait_for_terminal(&engine, &job.id).await;

        engine.delete_job(&job.id).await.unwrap();
        assert!(engine.get_job(&job.id).await.is_err());
        assert!(!dir.path().join("job-g").exists());
    }
}

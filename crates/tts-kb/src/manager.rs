//! Knowledge-bowl module audio pre-generation and serving.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tts_core::{Priority, Provider};
use tts_pool::{estimate_wav_duration_seconds, SynthesisRequest, TtsResourcePool};

use crate::manifest::{KbAudioEntry, KbCoverageStatus, KbJobStatus, KbManifest, KbPrefetchProgress};
use crate::path::{is_safe_path_component, safe_join};
use crate::segment::{extract_segments, KbSegment};

struct Job {
    handle: JoinHandle<()>,
    progress: Arc<Mutex<KbPrefetchProgress>>,
}

/// Voice settings a module pre-generation job or the feedback-phrase job
/// runs with.
#[derive(Clone, Debug)]
pub struct KbVoiceConfig {
    pub voice_id: String,
    pub provider: Provider,
    pub speed: f64,
}

impl Default for KbVoiceConfig {
    fn default() -> Self {
        Self { voice_id: "nova".to_string(), provider: Provider::Vibevoice, speed: 1.0 }
    }
}

/// Manages pre-generated TTS audio for Knowledge Bowl questions: batch
/// generation into `base_dir/<module_id>/<question_id>/<segment>.wav` plus
/// a per-module `manifest.json`, and safe serving by id.
pub struct KbAudioManager {
    base_dir: PathBuf,
    pool: Arc<TtsResourcePool>,
    delay_between_requests_ms: u64,
    jobs: Mutex<HashMap<String, Job>>,
    manifests: Arc<Mutex<HashMap<String, KbManifest>>>,
}

impl KbAudioManager {
    /// Build a manager rooted at `base_dir`, generating through `pool`.
    #[must_use]
    pub fn new(base_dir: impl Into<PathBuf>, pool: Arc<TtsResourcePool>) -> Self {
        Self {
            base_dir: base_dir.into(),
            pool,
            delay_between_requests_ms: 100,
            jobs: Mutex::new(HashMap::new()),
            manifests: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Create storage directories and load any manifests already on disk.
    pub async fn initialize(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        tokio::fs::create_dir_all(self.base_dir.join("feedback")).await?;

        let mut entries = tokio::fs::read_dir(&self.base_dir).await?;
        let mut manifests = self.manifests.lock().await;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let module_id = entry.file_name().to_string_lossy().into_owned();
            if module_id == "feedback" {
                continue;
            }
            let manifest_path = entry.path().join("manifest.json");
            if !manifest_path.exists() {
                continue;
            }
            match tokio::fs::read_to_string(&manifest_path).await {
                Ok(raw) => match serde_json::from_str::<KbManifest>(&raw) {
                    Ok(manifest) => {
                        manifests.insert(module_id.clone(), manifest);
                        info!(module_id = %module_id, "loaded KB manifest");
                    }
                    Err(e) => warn!(module_id = %module_id, error = %e, "failed to parse KB manifest"),
                },
                Err(e) => warn!(module_id = %module_id, error = %e, "failed to read KB manifest"),
            }
        }
        Ok(())
    }

    /// Extract every speakable segment from a module's JSON content.
    #[must_use]
    pub fn extract_segments(&self, module_content: &serde_json::Value) -> Vec<KbSegment> {
        extract_segments(module_content)
    }

    /// Start background pre-generation of every segment in a module.
    /// Cancels and replaces any job already running for the same module.
    pub async fn prefetch_module(
        &self,
        module_id: String,
        module_content: &serde_json::Value,
        config: KbVoiceConfig,
        force_regenerate: bool,
    ) -> String {
        let job_id = format!("kb_prefetch_{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);

        {
            let mut jobs = self.jobs.lock().await;
            let stale: Vec<String> = {
                let mut found = Vec::new();
                for (id, job) in jobs.iter() {
                    if job.progress.lock().await.module_id == module_id {
                        found.push(id.clone());
                    }
                }
                found
            };
            for id in stale {
                if let Some(job) = jobs.remove(&id) {
                    job.handle.abort();
                    info!(job_id = %id, %module_id, "cancelled existing KB prefetch job");
                }
            }
        }

        let segments = extract_segments(module_content);
        if segments.is_empty() {
            warn!(%module_id, "no segments found in module");
            return job_id;
        }

        let progress = Arc::new(Mutex::new(KbPrefetchProgress::new(
            job_id.clone(),
            module_id.clone(),
            segments.len(),
        )));

        let base_dir = self.base_dir.clone();
        let pool = Arc::clone(&self.pool);
        let progress_for_task = Arc::clone(&progress);
        let delay_ms = self.delay_between_requests_ms;
        let module_id_for_task = module_id.clone();
        let job_id_for_log = job_id.clone();
        let manifest_store = Arc::clone(&self.manifests);

        let handle = tokio::spawn(async move {
            run_module_generation(
                base_dir,
                pool,
                progress_for_task,
                module_id_for_task,
                segments,
                config,
                force_regenerate,
                delay_ms,
                manifest_store,
            )
            .await;
            info!(job_id = %job_id_for_log, "KB prefetch job finished");
        });

        self.jobs.lock().await.insert(job_id.clone(), Job { handle, progress });
        info!(job_id = %job_id, %module_id, "started KB prefetch job");
        job_id
    }

    /// Read cached audio for one segment. Returns `None` if any identifier
    /// is unsafe, the file does not exist, or it cannot be read.
    pub async fn get_audio(
        &self,
        module_id: &str,
        question_id: &str,
        segment_type: &str,
        hint_index: usize,
    ) -> Option<Vec<u8>> {
        if !is_safe_path_component(module_id)
            || !is_safe_path_component(question_id)
            || !is_safe_path_component(segment_type)
        {
            warn!(%module_id, %question_id, %segment_type, "rejected unsafe KB audio identifier");
            return None;
        }

        let filename = if segment_type == "hint" {
            format!("hint_{hint_index}.wav")
        } else {
            format!("{segment_type}.wav")
        };

        let path = safe_join(&self.base_dir, &[module_id, question_id, &filename])?;
        tokio::fs::read(&path).await.ok()
    }

    /// Read a pre-generated feedback phrase (`"correct"`, `"incorrect"`, ...).
    pub async fn get_feedback_audio(&self, feedback_type: &str) -> Option<Vec<u8>> {
        if !is_safe_path_component(feedback_type) {
            warn!(%feedback_type, "rejected unsafe feedback identifier");
            return None;
        }
        let filename = format!("{feedback_type}.wav");
        let path = safe_join(&self.base_dir.join("feedback"), &[&filename])?;
        tokio::fs::read(&path).await.ok()
    }

    /// Generate the small set of static feedback phrases if not already
    /// present.
    pub async fn generate_feedback_audio(&self, config: KbVoiceConfig) {
        let feedback_dir = self.base_dir.join("feedback");
        if let Err(e) = tokio::fs::create_dir_all(&feedback_dir).await {
            warn!(error = %e, "failed to create feedback directory");
            return;
        }

        for (filename, text) in [("correct", "Correct!"), ("incorrect", "Incorrect.")] {
            let file_path = feedback_dir.join(format!("{filename}.wav"));
            if file_path.exists() {
                continue;
            }
            let request = SynthesisRequest {
                text: text.to_string(),
                voice_id: config.voice_id.clone(),
                provider: config.provider,
                speed: config.speed,
                chatterbox_config: None,
            };
            match self.pool.generate_with_priority(request, Priority::Scheduled).await {
                Ok(result) => {
                    if let Err(e) = tokio::fs::write(&file_path, &result.audio_data).await {
                        warn!(filename, error = %e, "failed to write feedback audio");
                    } else {
                        info!(filename, "generated feedback audio");
                    }
                }
                Err(e) => warn!(filename, error = %e, "failed to generate feedback audio"),
            }
        }
    }

    /// Look up a module's manifest, if one has been generated.
    pub async fn get_manifest(&self, module_id: &str) -> Option<KbManifest> {
        self.manifests.lock().await.get(module_id).cloned()
    }

    /// Compare a module's current content against what has been generated
    /// on disk.
    pub fn coverage_status(&self, module_id: &str, module_content: &serde_json::Value) -> KbCoverageStatus {
        let segments = extract_segments(module_content);
        let total_segments = segments.len();
        let mut covered_questions = std::collections::HashSet::new();
        let mut all_questions = std::collections::HashSet::new();
        let mut covered_segments = 0usize;
        let mut total_size = 0u64;

        let module_dir = self.base_dir.join(module_id);
        for segment in &segments {
            all_questions.insert(segment.question_id.clone());
            let file_path = module_dir.join(&segment.question_id).join(segment.filename());
            if let Ok(meta) = std::fs::metadata(&file_path) {
                covered_segments += 1;
                covered_questions.insert(segment.question_id.clone());
                total_size += meta.len();
            }
        }

        KbCoverageStatus {
            module_id: module_id.to_string(),
            total_questions: all_questions.len(),
            covered_questions: covered_questions.len(),
            total_segments,
            covered_segments,
            missing_segments: total_segments - covered_segments,
            total_size_bytes: total_size,
            is_complete: covered_segments == total_segments,
        }
    }

    /// Snapshot progress for one job.
    pub async fn progress(&self, job_id: &str) -> Option<KbPrefetchProgress> {
        let jobs = self.jobs.lock().await;
        let job = jobs.get(job_id)?;
        Some(job.progress.lock().await.clone())
    }

    /// Snapshot progress for every tracked job.
    pub async fn all_jobs(&self) -> Vec<KbPrefetchProgress> {
        let jobs = self.jobs.lock().await;
        let mut out = Vec::with_capacity(jobs.len());
        for job in jobs.values() {
            out.push(job.progress.lock().await.clone());
        }
        out
    }

    /// Cancel a running job.
    pub async fn cancel(&self, job_id: &str) -> bool {
        let jobs = self.jobs.lock().await;
        let Some(job) = jobs.get(job_id) else {
            return false;
        };
        job.handle.abort();
        let mut progress = job.progress.lock().await;
        progress.status = KbJobStatus::Cancelled;
        progress.completed_at = Some(Utc::now());
        true
    }

    /// Drop completed/cancelled/failed jobs older than `max_age_seconds`.
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

#[allow(clippy::too_many_arguments)]
async fn run_module_generation(
    base_dir: PathBuf,
    pool: Arc<TtsResourcePool>,
    progress: Arc<Mutex<KbPrefetchProgress>>,
    module_id: String,
    segments: Vec<KbSegment>,
    config: KbVoiceConfig,
    force_regenerate: bool,
    delay_ms: u64,
    manifests: Arc<Mutex<HashMap<String, KbManifest>>>,
) {
    {
        let mut p = progress.lock().await;
        p.status = KbJobStatus::InProgress;
        p.started_at = Some(Utc::now());
    }

    let module_dir = base_dir.join(&module_id);
    if let Err(e) = tokio::fs::create_dir_all(&module_dir).await {
        let mut p = progress.lock().await;
        p.status = KbJobStatus::Failed;
        p.error = Some(e.to_string());
        p.completed_at = Some(Utc::now());
        return;
    }

    let mut manifest = KbManifest::new(module_id.clone(), config.voice_id.clone(), config.provider.id().to_string());
    let mut question_ids = std::collections::HashSet::new();

    for segment in &segments {
        {
            let p = progress.lock().await;
            if p.status == KbJobStatus::Cancelled {
                break;
            }
        }

        question_ids.insert(segment.question_id.clone());
        let question_dir = module_dir.join(&segment.question_id);
        if let Err(e) = tokio::fs::create_dir_all(&question_dir).await {
            warn!(error = %e, "failed to create question directory");
            let mut p = progress.lock().await;
            p.failed += 1;
            p.completed += 1;
            continue;
        }

        let file_path = question_dir.join(segment.filename());

        if file_path.exists() && !force_regenerate {
            if let Ok(meta) = tokio::fs::metadata(&file_path).await {
                let entry = KbAudioEntry {
                    question_id: segment.question_id.clone(),
                    segment_type: segment.segment_type.as_str().to_string(),
                    file_path: file_path.to_string_lossy().into_owned(),
                    size_bytes: meta.len(),
                    duration_seconds: estimate_wav_duration_seconds(&vec![0u8; meta.len() as usize], 24000),
                    sample_rate: 24000,
                    created_at: meta.modified().map(chrono::DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now()),
                    hint_index: segment.hint_index,
                };
                manifest.add_entry(entry);
            }
            let mut p = progress.lock().await;
            p.cached += 1;
            p.completed += 1;
            continue;
        }

        let request = SynthesisRequest {
            text: segment.text.clone(),
            voice_id: config.voice_id.clone(),
            provider: config.provider,
            speed: config.speed,
            chatterbox_config: None,
        };

        match pool.generate_with_priority(request, Priority::Scheduled).await {
            Ok(result) => {
                if let Err(e) = tokio::fs::write(&file_path, &result.audio_data).await {
                    warn!(error = %e, "failed to write KB audio file");
                    let mut p = progress.lock().await;
                    p.failed += 1;
                    p.completed += 1;
                    continue;
                }
                manifest.add_entry(KbAudioEntry {
                    question_id: segment.question_id.clone(),
                    segment_type: segment.segment_type.as_str().to_string(),
                    file_path: file_path.to_string_lossy().into_owned(),
                    size_bytes: result.audio_data.len() as u64,
                    duration_seconds: result.duration_seconds,
                    sample_rate: result.sample_rate,
                    created_at: Utc::now(),
                    hint_index: segment.hint_index,
                });
                let mut p = progress.lock().await;
                p.generated += 1;
                p.completed += 1;
                drop(p);
                if delay_ms > 0 {
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
            Err(e) => {
                warn!(question_id = %segment.question_id, error = %e, "failed to generate KB segment");
                let mut p = progress.lock().await;
                p.failed += 1;
                p.completed += 1;
            }
        }
    }

    let final_status = {
        let p = progress.lock().await;
        p.status
    };

    manifest.total_questions = question_ids.len();
    manifest.total_segments = progress.lock().await.completed;

    if final_status != KbJobStatus::Cancelled {
        let manifest_path = module_dir.join("manifest.json");
        if let Ok(json) = serde_json::to_string_pretty(&manifest) {
            let _ = tokio::fs::write(&manifest_path, json).await;
        }
        manifests.lock().await.insert(module_id.clone(), manifest);
    }

    let mut p = progress.lock().await;
    if p.status != KbJobStatus::Cancelled {
        p.status = if p.failed == 0 { KbJobStatus::Completed } else { KbJobStatus::CompletedWithErrors };
    }
    p.completed_at = Some(Utc::now());
    info!(
        job_id = %p.job_id,
        generated = p.generated,
        cached = p.cached,
        failed = p.failed,
        "KB prefetch job complete"
    );
}

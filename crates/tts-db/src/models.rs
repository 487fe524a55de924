//! Domain rows persisted by the job engine, profile manager, and
//! comparison session manager. These are plain data types; the
//! business logic that mutates them lives in `tts-pregen`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tts_core::Provider;

/// Voice tuning knobs shared by profiles, jobs, and comparison
/// configurations. `extra` carries provider-specific fields this schema
/// does not otherwise name, stored as an opaque JSON object.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VoiceSettings {
    pub speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exaggeration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cfg_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl VoiceSettings {
    /// Settings at the default speed with no provider extras.
    #[must_use]
    pub fn at_speed(speed: f64) -> Self {
        Self { speed, ..Default::default() }
    }
}

/// A complete, self-contained TTS synthesis configuration: which provider,
/// which voice, and what settings. This is the shape `profile_to_tts_config`
/// projects a [`Profile`] into, and the shape jobs/variants store inline
/// when no profile is referenced.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TtsConfig {
    pub provider: Provider,
    pub voice_id: String,
    pub settings: VoiceSettings,
}

/// A reusable, named voice configuration.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub name: String,
    pub provider: Provider,
    pub voice_id: String,
    pub settings: VoiceSettings,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub use_case: Option<String>,
    pub is_active: bool,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_from_session_id: Option<String>,
    pub sample_audio_path: Option<String>,
    pub sample_text: Option<String>,
}

impl Profile {
    /// Project this profile into the config shape the resource pool consumes.
    #[must_use]
    pub fn to_tts_config(&self) -> TtsConfig {
        TtsConfig {
            provider: self.provider,
            voice_id: self.voice_id.clone(),
            settings: self.settings.clone(),
        }
    }

    /// Portable export shape: everything needed to recreate this profile
    /// elsewhere, minus identity and audit fields.
    #[must_use]
    pub fn to_export(&self) -> ProfileExport {
        ProfileExport {
            name: self.name.clone(),
            description: self.description.clone(),
            provider: self.provider,
            voice_id: self.voice_id.clone(),
            settings: self.settings.clone(),
            tags: self.tags.clone(),
            use_case: self.use_case.clone(),
            sample_text: self.sample_text.clone(),
            exported_at: Utc::now(),
        }
    }
}

/// Fields required to create a new profile.
#[derive(Clone, Debug)]
pub struct NewProfile {
    pub name: String,
    pub provider: Provider,
    pub voice_id: String,
    pub settings: VoiceSettings,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub use_case: Option<String>,
    pub created_from_session_id: Option<String>,
    pub sample_text: Option<String>,
}

/// Portable export of a profile's recreatable fields, used by
/// `export_profile`/`import_profile`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProfileExport {
    pub name: String,
    pub description: Option<String>,
    pub provider: Provider,
    pub voice_id: String,
    pub settings: VoiceSettings,
    pub tags: Vec<String>,
    pub use_case: Option<String>,
    pub sample_text: Option<String>,
    pub exported_at: DateTime<Utc>,
}

/// A module's binding to a profile, optionally scoped to a context string
/// (e.g. a specific grade band), with a priority used to resolve conflicts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ModuleProfileBinding {
    pub module_id: String,
    pub profile_id: String,
    pub context: Option<String>,
    pub priority: i64,
}

/// Batch job type: a plain pre-generation batch, or a comparison session's
/// variant generation (which reuses the same item/retry machinery).
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Batch,
    Comparison,
}

/// Lifecycle state of a pre-gen job.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    /// Whether a job in this state has finished and will never transition
    /// again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether a job in this state can be resumed into `Running`.
    #[must_use]
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::Paused | Self::Failed)
    }

    /// Parse from the lowercase name stored in the database.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A durable batch TTS generation job.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub source_type: String,
    pub profile_id: Option<String>,
    pub tts_config: Option<TtsConfig>,
    pub output_dir: String,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub current_index: i64,
    pub current_text: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub consecutive_failures: i64,
}

impl Job {
    /// Items that have not yet reached a terminal per-item state.
    #[must_use]
    pub const fn pending(&self) -> i64 {
        self.total - self.completed - self.failed
    }

    /// Whether this job can be resumed via `resume_job`.
    #[must_use]
    pub const fn resumable(&self) -> bool {
        self.status.is_resumable()
    }
}

/// Status of a single item within a job.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl JobItemStatus {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

/// One unit of work within a [`Job`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JobItem {
    pub id: String,
    pub job_id: String,
    pub item_index: i64,
    pub text: String,
    pub text_hash: String,
    pub source_ref: Option<String>,
    pub status: JobItemStatus,
    pub attempt_count: i64,
    pub output_file: Option<String>,
    pub duration_seconds: Option<f64>,
    pub file_size_bytes: Option<i64>,
    pub sample_rate: Option<i64>,
    pub last_error: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
}

/// Text submitted for batch generation, before item rows are created.
#[derive(Clone, Debug)]
pub struct NewJobItem {
    pub text: String,
    pub source_ref: Option<String>,
}

/// Lifecycle state of a comparison session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonSessionStatus {
    Draft,
    Generating,
    Ready,
    Archived,
}

impl ComparisonSessionStatus {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "generating" => Some(Self::Generating),
            "ready" => Some(Self::Ready),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Archived => "archived",
        }
    }
}

/// One text sample in a comparison session's sample set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ComparisonSample {
    pub text: String,
    pub source_ref: Option<String>,
}

/// One candidate voice configuration in a comparison session's config set.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ComparisonConfiguration {
    pub name: String,
    pub provider: Provider,
    pub voice_id: String,
    pub settings: VoiceSettings,
}

/// A sample x configuration A/B comparison matrix.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ComparisonSession {
    pub id: String,
    pub name: String,
    pub status: ComparisonSessionStatus,
    pub samples: Vec<ComparisonSample>,
    pub configurations: Vec<ComparisonConfiguration>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ComparisonSession {
    /// The fixed size of this session's variant matrix.
    #[must_use]
    pub fn variant_count(&self) -> usize {
        self.samples.len() * self.configurations.len()
    }
}

/// Lifecycle state of one cell of the comparison matrix.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonVariantStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

impl ComparisonVariantStatus {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "generating" => Some(Self::Generating),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

/// One cell `(sample_index, config_index)` of a comparison session.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ComparisonVariant {
    pub id: String,
    pub session_id: String,
    pub sample_index: i64,
    pub config_index: i64,
    pub tts_config: TtsConfig,
    pub status: ComparisonVariantStatus,
    pub output_file: Option<String>,
    pub duration_seconds: Option<f64>,
}

/// A single 1-5 rating of a comparison variant.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ComparisonRating {
    pub id: String,
    pub variant_id: String,
    pub rating: i64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

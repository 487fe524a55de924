//! A/B comparison of samples x voice configurations, with rating capture
//! and ranking.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};
use tts_core::Priority;
use tts_db::{
    ComparisonConfiguration, ComparisonRepository, ComparisonSample, ComparisonSession,
    ComparisonSessionStatus, ComparisonVariant, ComparisonVariantStatus, NewComparisonSession,
};
use tts_pool::{ChatterboxConfig, SynthesisRequest, TtsResourcePool};

use crate::error::{PregenError, PregenResult};
use crate::profile_manager::ProfileManager;

/// Ranked summary of one candidate configuration's variants within a
/// session, sorted by `(average_rating, rating_count)` descending — the
/// basis for picking a "winner."
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigurationSummary {
    pub config_index: i64,
    pub configuration: ComparisonConfiguration,
    pub average_rating: Option<f64>,
    pub rating_count: usize,
    pub variant_count: usize,
}

/// Every variant of a session alongside its aggregated per-configuration
/// ranking.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    pub session: ComparisonSession,
    pub configurations: Vec<ConfigurationSummary>,
}

/// Manages A/B comparison sessions: materializing the sample x
/// configuration variant matrix, generating each variant's audio, and
/// aggregating ratings into a ranked summary.
pub struct ComparisonManager {
    sessions: Arc<dyn ComparisonRepository>,
    pool: Arc<TtsResourcePool>,
    base_dir: PathBuf,
}

impl ComparisonManager {
    #[must_use]
    pub fn new(sessions: Arc<dyn ComparisonRepository>, pool: Arc<TtsResourcePool>, base_dir: impl Into<PathBuf>) -> Self {
        Self { sessions, pool, base_dir: base_dir.into() }
    }

    /// Create a session and materialize its variant matrix in `draft`.
    pub async fn create_session(
        &self,
        name: String,
        samples: Vec<ComparisonSample>,
        configurations: Vec<ComparisonConfiguration>,
    ) -> PregenResult<ComparisonSession> {
        Ok(self.sessions.create_session(NewComparisonSession { name, samples, configurations }).await?)
    }

    pub async fn get_session(&self, id: &str) -> PregenResult<ComparisonSession> {
        Ok(self.sessions.get_session(id).await?)
    }

    pub async fn list_sessions(&self) -> PregenResult<Vec<ComparisonSession>> {
        Ok(self.sessions.list_sessions().await?)
    }

    /// Synthesize every eligible variant of a session sequentially, at
    /// `Scheduled` priority, moving the session through `generating` to
    /// either `ready` (at least one variant succeeded) or back to `draft`
    /// (every variant failed). When `regenerate` is `false`, variants
    /// already `ready` are left untouched; when `true`, every variant is
    /// resynthesized regardless of its current status. A variant that
    /// fails synthesis is marked `failed` and does not block the rest of
    /// the matrix.
    pub async fn generate_variants(&self, session_id: &str, regenerate: bool) -> PregenResult<()> {
        let session = self.sessions.get_session(session_id).await?;
        self.sessions.update_session_status(session_id, ComparisonSessionStatus::Generating).await?;

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| PregenError::filesystem(e.to_string()))?;

        let variants = self.sessions.variants_for_session(session_id).await?;
        let mut any_failed = false;
        let mut any_ready = false;

        for mut variant in variants {
            if !regenerate && variant.status == ComparisonVariantStatus::Ready {
                any_ready = true;
                continue;
            }
            variant.status = ComparisonVariantStatus::Generating;
            self.sessions.update_variant(&variant).await?;

            let sample = &session.samples[variant.sample_index as usize];
            let request = SynthesisRequest {
                text: sample.text.clone(),
                voice_id: variant.tts_config.voice_id.clone(),
                provider: variant.tts_config.provider,
                speed: variant.tts_config.settings.speed,
                chatterbox_config: variant.tts_config.provider.supports_chatterbox_fields().then(|| {
                    ChatterboxConfig {
                        exaggeration: variant.tts_config.settings.exaggeration,
                        cfg_weight: variant.tts_config.settings.cfg_weight,
                        language: variant.tts_config.settings.language.clone(),
                    }
                }),
            };

            match self.pool.generate_with_priority(request, Priority::Scheduled).await {
                Ok(result) => {
                    let filename = format!("variant_{}_{}.wav", variant.sample_index, variant.config_index);
                    let file_path = Path::new(&self.base_dir).join(&filename);
                    match tokio::fs::write(&file_path, &result.audio_data).await {
                        Ok(()) => {
                            variant.status = ComparisonVariantStatus::Ready;
                            variant.output_file = Some(file_path.to_string_lossy().into_owned());
                            variant.duration_seconds = Some(result.duration_seconds);
                            any_ready = true;
                        }
                        Err(e) => {
                            warn!(variant_id = %variant.id, error = %e, "failed to write variant audio");
                            variant.status = ComparisonVariantStatus::Failed;
                            any_failed = true;
                        }
                    }
                }
                Err(e) => {
                    warn!(variant_id = %variant.id, error = %e, "variant synthesis failed");
                    variant.status = ComparisonVariantStatus::Failed;
                    any_failed = true;
                }
            }

            self.sessions.update_variant(&variant).await?;
        }

        if any_ready {
            self.sessions.update_session_status(session_id, ComparisonSessionStatus::Ready).await?;
            if any_failed {
                warn!(session_id, "comparison session ready with one or more failed variants");
            } else {
                info!(session_id, "comparison session variants generated");
            }
        } else {
            self.sessions.update_session_status(session_id, ComparisonSessionStatus::Draft).await?;
            warn!(session_id, "comparison session reverted to draft; no variant succeeded");
        }
        Ok(())
    }

    /// Record (or replace) a 1-5 rating for a variant.
    pub async fn rate_variant(&self, variant_id: &str, rating: i64, notes: Option<String>) -> PregenResult<()> {
        self.sessions.upsert_rating(variant_id, rating, notes).await?;
        Ok(())
    }

    /// Aggregate every configuration's ratings into a ranked summary,
    /// highest `(average_rating, rating_count)` first.
    pub async fn session_summary(&self, session_id: &str) -> PregenResult<SessionSummary> {
        let session = self.sessions.get_session(session_id).await?;
        let variants = self.sessions.variants_for_session(session_id).await?;
        let ratings = self.sessions.ratings_for_session(session_id).await?;

        let mut configurations = Vec::with_capacity(session.configurations.len());
        for (config_index, configuration) in session.configurations.iter().enumerate() {
            let config_index = config_index as i64;
            let variant_ids: Vec<&str> = variants
                .iter()
                .filter(|v| v.config_index == config_index)
                .map(|v| v.id.as_str())
                .collect();
            let variant_count = variant_ids.len();

            let matching_ratings: Vec<i64> =
                ratings.iter().filter(|r| variant_ids.contains(&r.variant_id.as_str())).map(|r| r.rating).collect();

            let rating_count = matching_ratings.len();
            let average_rating =
                (rating_count > 0).then(|| matching_ratings.iter().sum::<i64>() as f64 / rating_count as f64);

            configurations.push(ConfigurationSummary {
                config_index,
                configuration: configuration.clone(),
                average_rating,
                rating_count,
                variant_count,
            });
        }

        configurations.sort_by(|a, b| {
            b.average_rating
                .partial_cmp(&a.average_rating)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.rating_count.cmp(&a.rating_count))
        });

        Ok(SessionSummary { session, configurations })
    }

    /// Promote a rated variant's exact configuration into a standalone,
    /// reusable profile.
    pub async fn create_profile_from_variant(
        &self,
        variant_id: &str,
        profile_name: String,
        profiles: &ProfileManager,
    ) -> PregenResult<tts_db::Profile> {
        let variant = self.sessions.get_variant(variant_id).await?;
        if variant.status != ComparisonVariantStatus::Ready {
            return Err(PregenError::policy_violation("only a successfully generated variant can seed a profile"));
        }
        profiles.create_from_config(profile_name, variant.tts_config.clone(), variant.session_id.clone()).await
    }

    /// Archive a session and remove its variant audio files.
    pub async fn delete_session(&self, session_id: &str) -> PregenResult<()> {
        let variants = self.sessions.variants_for_session(session_id).await.unwrap_or_default();
        self.sessions.delete_session(session_id).await?;
        for variant in variants {
            if let Some(path) = variant.output_file {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    warn!(variant_id = %variant.id, error = %e, "failed to remove variant audio file");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tts_core::Provider;
    use tts_db::{setup_test_database, ProfileRepository, SqliteComparisonRepository, SqliteProfileRepository, VoiceSettings};
    use tts_pool::{GenerationResult, PoolResult, TtsSynthesizer};

    struct Fake;

    #[async_trait]
    impl TtsSynthesizer for Fake {
        async fn synthesize(&self, _request: &SynthesisRequest) -> PoolResult<GenerationResult> {
            Ok(GenerationResult { audio_data: vec![7u8; 50], sample_rate: 22050, duration_seconds: 0.3 })
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl TtsSynthesizer for AlwaysFails {
        async fn synthesize(&self, _request: &SynthesisRequest) -> PoolResult<GenerationResult> {
            Err(tts_pool::PoolError::connection("synthesizer unavailable"))
        }
    }

    fn configurations() -> Vec<ComparisonConfiguration> {
        vec![
            ComparisonConfiguration {
                name: "warm".to_string(),
                provider: Provider::Piper,
                voice_id: "v1".to_string(),
                settings: VoiceSettings::at_speed(1.0),
            },
            ComparisonConfiguration {
                name: "crisp".to_string(),
                provider: Provider::Vibevoice,
                voice_id: "v2".to_string(),
                settings: VoiceSettings::at_speed(1.0),
            },
        ]
    }

    fn samples() -> Vec<ComparisonSample> {
        vec![
            ComparisonSample { text: "Hello there".to_string(), source_ref: None },
            ComparisonSample { text: "Good morning".to_string(), source_ref: None },
        ]
    }

    async fn setup() -> (ComparisonManager, ProfileManager, tempfile::TempDir) {
        setup_with(Arc::new(Fake)).await
    }

    async fn setup_with(
        synthesizer: Arc<dyn TtsSynthesizer>,
    ) -> (ComparisonManager, ProfileManager, tempfile::TempDir) {
        let db_pool = setup_test_database().await.unwrap();
        let sessions: Arc<dyn ComparisonRepository> = Arc::new(SqliteComparisonRepository::new(db_pool.clone()));
        let profiles: Arc<dyn ProfileRepository> = Arc::new(SqliteProfileRepository::new(db_pool));
        let pool = Arc::new(TtsResourcePool::with_defaults(synthesizer));
        let dir = tempfile::tempdir().unwrap();
        let comparison_mgr = ComparisonManager::new(sessions, Arc::clone(&pool), dir.path());
        let profile_mgr = ProfileManager::new(profiles, pool, dir.path());
        (comparison_mgr, profile_mgr, dir)
    }

    #[tokio::test]
    async fn generate_variants_marks_all_ready_and_writes_files() {
        let (mgr, _profiles, dir) = setup().await;
        let session = mgr.create_session("bakeoff".to_string(), samples(), configurations()).await.unwrap();
        mgr.generate_variants(&session.id, false).await.unwrap();

        let refreshed = mgr.get_session(&session.id).await.unwrap();
        assert_eq!(refreshed.status, ComparisonSessionStatus::Ready);

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn summary_ranks_configurations_by_average_rating() {
        let (mgr, _profiles, _dir) = setup().await;
        let session = mgr.create_session("bakeoff".to_string(), samples(), configurations()).await.unwrap();
        mgr.generate_variants(&session.id, false).await.unwrap();

        let variants = mgr.sessions.variants_for_session(&session.id).await.unwrap();
        for v in &variants {
            let rating = if v.config_index == 0 { 5 } else { 2 };
            mgr.rate_variant(&v.id, rating, None).await.unwrap();
        }

        let summary = mgr.session_summary(&session.id).await.unwrap();
        assert_eq!(summary.configurations[0].config_index, 0);
        assert_eq!(summary.configurations[0].average_rating, Some(5.0));
        assert_eq!(summary.configurations[1].average_rating, Some(2.0));
    }

    #[tokio::test]
    async fn create_profile_from_variant_copies_its_exact_configuration() {
        let (mgr, profiles, _dir) = setup().await;
        let session = mgr.create_session("bakeoff".to_string(), samples(), configurations()).await.unwrap();
        mgr.generate_variants(&session.id, false).await.unwrap();
        let variants = mgr.sessions.variants_for_session(&session.id).await.unwrap();
        let winner = &variants[0];

        let profile = mgr
            .create_profile_from_variant(&winner.id, "winner-voice".to_string(), &profiles)
            .await
            .unwrap();
        assert_eq!(profile.voice_id, winner.tts_config.voice_id);
        assert_eq!(profile.created_from_session_id, Some(winner.session_id.clone()));
    }

    #[tokio::test]
    async fn all_variants_failing_reverts_session_to_draft() {
        let (mgr, _profiles, _dir) = setup_with(Arc::new(AlwaysFails)).await;
        let session = mgr.create_session("bakeoff".to_string(), samples(), configurations()).await.unwrap();
        mgr.generate_variants(&session.id, false).await.unwrap();

        let refreshed = mgr.get_session(&session.id).await.unwrap();
        assert_eq!(refreshed.status, ComparisonSessionStatus::Draft);
    }

    #[tokio::test]
    async fn regenerate_true_resynthesizes_already_ready_variants() {
        let (mgr, _profiles, _dir) = setup().await;
        let session = mgr.create_session("bakeoff".to_string(), samples(), configurations()).await.unwrap();
        mgr.generate_variants(&session.id, false).await.unwrap();
        let first_pass = mgr.sessions.variants_for_session(&session.id).await.unwrap();
        assert!(first_pass.iter().all(|v| v.status == ComparisonVariantStatus::Ready));

        mgr.generate_variants(&session.id, true).await.unwrap();
        let second_pass = mgr.sessions.variants_for_session(&session.id).await.unwrap();
        assert!(second_pass.iter().all(|v| v.status == ComparisonVariantStatus::Ready));
        assert_eq!(mgr.get_session(&session.id).await.unwrap().status, ComparisonSessionStatus::Ready);
    }

    #[tokio::test]
    async fn regenerate_false_skips_already_ready_variants() {
        let (mgr, _profiles, _dir) = setup().await;
        let session = mgr.create_session("bakeoff".to_string(), samples(), configurations()).await.unwrap();
        mgr.generate_variants(&session.id, false).await.unwrap();
        let first_pass = mgr.sessions.variants_for_session(&session.id).await.unwrap();
        let first_output = first_pass[0].output_file.clone();

        mgr.generate_variants(&session.id, false).await.unwrap();
        let second_pass = mgr.sessions.variants_for_session(&session.id).await.unwrap();
        assert_eq!(second_pass[0].output_file, first_output);
    }

    #[tokio::test]
    async fn delete_session_removes_variant_audio_files() {
        let (mgr, _profiles, dir) = setup().await;
        let session = mgr.create_session("bakeoff".to_string(), samples(), configurations()).await.unwrap();
        mgr.generate_variants(&session.id, false).await.unwrap();

        mgr.delete_session(&session.id).await.unwrap();
        assert!(mgr.get_session(&session.id).await.is_err());

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}

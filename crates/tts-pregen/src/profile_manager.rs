//! Named, reusable voice configurations: CRUD, module resolution, sample
//! audio, and export/import/duplication.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use tts_core::Provider;
use tts_db::{ModuleProfileBinding, NewProfile, Profile, ProfileExport, ProfileRepository, TtsConfig, VoiceSettings};
use tts_pool::{ChatterboxConfig, SynthesisRequest, TtsResourcePool};

use crate::error::{PregenError, PregenResult};

/// Default text read aloud when a profile has not supplied its own sample
/// text.
pub const DEFAULT_SAMPLE_TEXT: &str =
    "This is a sample of how this voice sounds when reading a typical sentence aloud.";

/// Fields accepted when creating a new profile through the manager.
#[derive(Clone, Debug)]
pub struct CreateProfileRequest {
    pub name: String,
    pub provider: Provider,
    pub voice_id: String,
    pub settings: VoiceSettings,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub use_case: Option<String>,
    pub sample_text: Option<String>,
}

impl CreateProfileRequest {
    /// Reject settings that only mean something for the chatterbox
    /// provider (`exaggeration`, `cfg_weight`, `language`) when the
    /// profile targets another provider. Unlike cache-key derivation,
    /// which silently ignores these fields so identical audio always
    /// shares a cache entry, profile creation is a deliberate user choice
    /// and a mismatch here almost always means the caller picked the
    /// wrong provider.
    fn validate(&self) -> PregenResult<()> {
        if self.provider.supports_chatterbox_fields() {
            return Ok(());
        }
        if self.settings.exaggeration.is_some() {
            return Err(PregenError::policy_violation(
                "exaggeration is only valid for the chatterbox provider",
            ));
        }
        if self.settings.cfg_weight.is_some() {
            return Err(PregenError::policy_violation(
                "cfg_weight is only valid for the chatterbox provider",
            ));
        }
        if self.settings.language.is_some() {
            return Err(PregenError::policy_violation(
                "language is only valid for the chatterbox provider",
            ));
        }
        Ok(())
    }

    fn into_new_profile(self, created_from_session_id: Option<String>) -> NewProfile {
        NewProfile {
            name: self.name,
            provider: self.provider,
            voice_id: self.voice_id,
            settings: self.settings,
            description: self.description,
            tags: self.tags,
            use_case: self.use_case,
            created_from_session_id,
            sample_text: self.sample_text,
        }
    }
}

/// Manages the lifecycle of reusable voice profiles and their per-module
/// bindings. Sample audio is generated through the same [`TtsResourcePool`]
/// the job engine and comparison manager use, at `Scheduled` priority since
/// no user is waiting live on a profile preview.
pub struct ProfileManager {
    profiles: Arc<dyn ProfileRepository>,
    pool: Arc<TtsResourcePool>,
    base_dir: PathBuf,
}

impl ProfileManager {
    #[must_use]
    pub fn new(profiles: Arc<dyn ProfileRepository>, pool: Arc<TtsResourcePool>, base_dir: impl Into<PathBuf>) -> Self {
        Self { profiles, pool, base_dir: base_dir.into() }
    }

    pub async fn create_profile(&self, request: CreateProfileRequest) -> PregenResult<Profile> {
        request.validate()?;
        Ok(self.profiles.create(request.into_new_profile(None)).await?)
    }

    /// Create a profile seeded from a comparison variant's exact
    /// configuration, recording the originating session for provenance.
    pub async fn create_from_config(
        &self,
        name: String,
        config: TtsConfig,
        created_from_session_id: String,
    ) -> PregenResult<Profile> {
        let request = CreateProfileRequest {
            name,
            provider: config.provider,
            voice_id: config.voice_id,
            settings: config.settings,
            description: None,
            tags: vec![],
            use_case: None,
            sample_text: None,
        };
        request.validate()?;
        Ok(self.profiles.create(request.into_new_profile(Some(created_from_session_id))).await?)
    }

    pub async fn get_profile(&self, id: &str) -> PregenResult<Profile> {
        Ok(self.profiles.get(id).await?)
    }

    pub async fn list_profiles(&self, include_inactive: bool) -> PregenResult<Vec<Profile>> {
        Ok(self.profiles.list(include_inactive).await?)
    }

    pub async fn update_profile(&self, profile: &Profile) -> PregenResult<()> {
        Ok(self.profiles.update(profile).await?)
    }

    pub async fn set_active(&self, id: &str, is_active: bool) -> PregenResult<()> {
        Ok(self.profiles.set_active(id, is_active).await?)
    }

    pub async fn set_default(&self, id: &str) -> PregenResult<()> {
        Ok(self.profiles.set_default(id).await?)
    }

    pub async fn get_default(&self) -> PregenResult<Option<Profile>> {
        Ok(self.profiles.get_default().await?)
    }

    /// Soft-delete: deactivate rather than remove the row, so job/session
    /// history referencing this profile id remains resolvable. The default
    /// profile must be reassigned before it can be deleted.
    pub async fn delete_profile(&self, id: &str) -> PregenResult<()> {
        let profile = self.profiles.get(id).await?;
        if profile.is_default {
            return Err(PregenError::policy_violation(
                "cannot delete the default profile; set a different default first",
            ));
        }
        self.profiles.set_active(id, false).await?;
        Ok(())
    }

    /// Copy a profile's voice configuration under a new name. The copy
    /// starts active, non-default, with no sample audio of its own.
    pub async fn duplicate_profile(&self, id: &str, new_name: String) -> PregenResult<Profile> {
        let source = self.profiles.get(id).await?;
        let request = CreateProfileRequest {
            name: new_name,
            provider: source.provider,
            voice_id: source.voice_id,
            settings: source.settings,
            description: source.description,
            tags: source.tags,
            use_case: source.use_case,
            sample_text: source.sample_text,
        };
        request.validate()?;
        Ok(self.profiles.create(request.into_new_profile(None)).await?)
    }

    /// Portable export of everything needed to recreate this profile
    /// elsewhere.
    pub async fn export_profile(&self, id: &str) -> PregenResult<ProfileExport> {
        Ok(self.profiles.get(id).await?.to_export())
    }

    /// Recreate a profile from a previously exported shape. Rejected if the
    /// exported name collides with an existing profile; the caller decides
    /// whether to rename and retry.
    pub async fn import_profile(&self, export: ProfileExport) -> PregenResult<Profile> {
        let request = CreateProfileRequest {
            name: export.name,
            provider: export.provider,
            voice_id: export.voice_id,
            settings: export.settings,
            description: export.description,
            tags: export.tags,
            use_case: export.use_case,
            sample_text: export.sample_text,
        };
        request.validate()?;
        Ok(self.profiles.create(request.into_new_profile(None)).await?)
    }

    /// Bind a profile to a module, optionally scoped to a context string,
    /// with a priority used to break ties when more than one binding
    /// matches.
    pub async fn bind_module(
        &self,
        module_id: String,
        profile_id: String,
        context: Option<String>,
        priority: i64,
    ) -> PregenResult<()> {
        self.profiles.get(&profile_id).await?;
        self.profiles.upsert_binding(ModuleProfileBinding { module_id, profile_id, context, priority }).await?;
        Ok(())
    }

    /// Resolve the profile a module should use: the highest-priority
    /// binding whose context matches (an exact context match wins over a
    /// context-less fallback binding at the same priority), falling back to
    /// the global default profile if no binding exists.
    pub async fn resolve_for_module(&self, module_id: &str, context: Option<&str>) -> PregenResult<Option<Profile>> {
        let bindings = self.profiles.bindings_for_module(module_id).await?;

        let best = bindings
            .iter()
            .filter(|b| b.context.as_deref() == context || b.context.is_none())
            .max_by_key(|b| (b.priority, b.context.is_some()));

        match best {
            Some(binding) => Ok(Some(self.profiles.get(&binding.profile_id).await?)),
            None => self.get_default().await,
        }
    }

    /// Synthesize and persist this profile's preview sample, writing to
    /// `<base_dir>/<profile_id>.wav` and recording the path on the row.
    pub async fn generate_sample(&self, id: &str) -> PregenResult<Profile> {
        let mut profile = self.profiles.get(id).await?;
        let text = profile.sample_text.clone().unwrap_or_else(|| DEFAULT_SAMPLE_TEXT.to_string());

        let request = SynthesisRequest {
            text: text.clone(),
            voice_id: profile.voice_id.clone(),
            provider: profile.provider,
            speed: profile.settings.speed,
            chatterbox_config: profile.provider.supports_chatterbox_fields().then(|| ChatterboxConfig {
                exaggeration: profile.settings.exaggeration,
                cfg_weight: profile.settings.cfg_weight,
                language: profile.settings.language.clone(),
            }),
        };

        let result = self.pool.generate_with_priority(request, tts_core::Priority::Scheduled).await?;

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| PregenError::filesystem(e.to_string()))?;
        let file_path = Path::new(&self.base_dir).join(format!("{}.wav", profile.id));
        tokio::fs::write(&file_path, &result.audio_data)
            .await
            .map_err(|e| PregenError::filesystem(e.to_string()))?;

        profile.sample_audio_path = Some(file_path.to_string_lossy().into_owned());
        if profile.sample_text.is_none() {
            profile.sample_text = Some(text);
        }
        self.profiles.update(&profile).await?;
        info!(profile_id = %profile.id, "generated profile sample audio");
        Ok(profile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tts_db::{setup_test_database, SqliteProfileRepository};
    use tts_pool::{GenerationResult, PoolResult, TtsSynthesizer};

    struct Fake;

    #[async_trait]
    impl TtsSynthesizer for Fake {
        async fn synthesize(&self, _request: &SynthesisRequest) -> PoolResult<GenerationResult> {
            Ok(GenerationResult { audio_data: vec![1u8; 100], sample_rate: 22050, duration_seconds: 1.0 })
        }
    }

    async fn manager(base_dir: &Path) -> ProfileManager {
        let db_pool = setup_test_database().await.unwrap();
        let profiles: Arc<dyn ProfileRepository> = Arc::new(SqliteProfileRepository::new(db_pool));
        let pool = Arc::new(TtsResourcePool::with_defaults(Arc::new(Fake)));
        ProfileManager::new(profiles, pool, base_dir)
    }

    fn request(name: &str) -> CreateProfileRequest {
        CreateProfileRequest {
            name: name.to_string(),
            provider: Provider::Piper,
            voice_id: "nova".to_string(),
            settings: VoiceSettings::at_speed(1.0),
            description: None,
            tags: vec![],
            use_case: None,
            sample_text: None,
        }
    }

    #[tokio::test]
    async fn create_and_fetch_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let created = mgr.create_profile(request("tutor")).await.unwrap();
        let fetched = mgr.get_profile(&created.id).await.unwrap();
        assert_eq!(fetched.name, "tutor");
    }

    #[tokio::test]
    async fn cannot_delete_the_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let profile = mgr.create_profile(request("default-voice")).await.unwrap();
        mgr.set_default(&profile.id).await.unwrap();
        let err = mgr.delete_profile(&profile.id).await.unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[tokio::test]
    async fn deleting_a_non_default_profile_deactivates_it() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let profile = mgr.create_profile(request("side-voice")).await.unwrap();
        mgr.delete_profile(&profile.id).await.unwrap();
        let after = mgr.get_profile(&profile.id).await.unwrap();
        assert!(!after.is_active);
    }

    #[tokio::test]
    async fn duplicate_profile_copies_voice_settings_under_new_name() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let source = mgr.create_profile(request("original")).await.unwrap();
        let copy = mgr.duplicate_profile(&source.id, "copy".to_string()).await.unwrap();
        assert_eq!(copy.voice_id, source.voice_id);
        assert!(!copy.is_default);
        assert_ne!(copy.id, source.id);
    }

    #[tokio::test]
    async fn export_then_import_recreates_profile_under_same_name() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let original = mgr.create_profile(request("exportable")).await.unwrap();
        mgr.delete_profile(&original.id).await.unwrap();
        let export = mgr.export_profile(&original.id).await.unwrap();

        // Original is now inactive, so the exported name is free to reuse.
        let imported = mgr.import_profile(ProfileExport { name: "reimported".to_string(), ..export }).await.unwrap();
        assert_eq!(imported.voice_id, original.voice_id);
    }

    #[tokio::test]
    async fn module_resolution_falls_back_to_default_profile() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let profile = mgr.create_profile(request("fallback")).await.unwrap();
        mgr.set_default(&profile.id).await.unwrap();

        let resolved = mgr.resolve_for_module("unbound-module", None).await.unwrap();
        assert_eq!(resolved.unwrap().id, profile.id);
    }

    #[tokio::test]
    async fn module_resolution_prefers_bound_profile_over_default() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let default_profile = mgr.create_profile(request("default")).await.unwrap();
        mgr.set_default(&default_profile.id).await.unwrap();
        let bound_profile = mgr.create_profile(request("bound")).await.unwrap();
        mgr.bind_module("algebra-1".to_string(), bound_profile.id.clone(), None, 1).await.unwrap();

        let resolved = mgr.resolve_for_module("algebra-1", None).await.unwrap();
        assert_eq!(resolved.unwrap().id, bound_profile.id);
    }

    #[tokio::test]
    async fn chatterbox_settings_rejected_for_non_chatterbox_provider() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let mut req = request("mismatched");
        req.settings.exaggeration = Some(0.7);
        let err = mgr.create_profile(req).await.unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[tokio::test]
    async fn generate_sample_writes_file_and_records_path() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path()).await;
        let profile = mgr.create_profile(request("sampled")).await.unwrap();
        let updated = mgr.generate_sample(&profile.id).await.unwrap();
        let path = updated.sample_audio_path.unwrap();
        assert!(tokio::fs::metadata(&path).await.is_ok());
    }
}

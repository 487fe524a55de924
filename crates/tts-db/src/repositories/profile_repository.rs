//! `SQLite`-backed persistence for [`Profile`] and [`ModuleProfileBinding`].

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tts_core::Provider;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::{ModuleProfileBinding, NewProfile, Profile, VoiceSettings};

use super::row_mappers::{parse_json, parse_timestamp, to_json};

/// Port trait for profile and module-binding persistence, so
/// `tts-pregen`'s `ProfileManager` can be tested against an in-memory
/// double without a real database.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn create(&self, new_profile: NewProfile) -> DbResult<Profile>;
    async fn get(&self, id: &str) -> DbResult<Profile>;
    async fn get_by_name(&self, name: &str) -> DbResult<Option<Profile>>;
    async fn list(&self, include_inactive: bool) -> DbResult<Vec<Profile>>;
    async fn update(&self, profile: &Profile) -> DbResult<()>;
    async fn set_active(&self, id: &str, is_active: bool) -> DbResult<()>;
    async fn set_default(&self, id: &str) -> DbResult<()>;
    async fn get_default(&self) -> DbResult<Option<Profile>>;
    async fn delete(&self, id: &str) -> DbResult<bool>;

    async fn upsert_binding(&self, binding: ModuleProfileBinding) -> DbResult<()>;
    async fn bindings_for_module(&self, module_id: &str) -> DbResult<Vec<ModuleProfileBinding>>;
}

/// `SQLite` implementation of [`ProfileRepository`].
pub struct SqliteProfileRepository {
    pool: SqlitePool,
}

impl SqliteProfileRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const PROFILE_COLUMNS: &str = "id, name, provider, voice_id, settings, description, tags, \
     use_case, is_active, is_default, created_at, updated_at, created_from_session_id, \
     sample_audio_path, sample_text";

fn row_to_profile(row: &SqliteRow) -> DbResult<Profile> {
    let provider_str: String = row.try_get("provider").map_err(|e| DbError::storage(&e))?;
    let provider = Provider::parse(&provider_str)
        .map_err(|e| DbError::storage(&sqlx::Error::Decode(Box::new(e))))?;
    let settings: String = row.try_get("settings").map_err(|e| DbError::storage(&e))?;
    let tags: String = row.try_get("tags").map_err(|e| DbError::storage(&e))?;
    let created_at: String = row.try_get("created_at").map_err(|e| DbError::storage(&e))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| DbError::storage(&e))?;

    Ok(Profile {
        id: row.try_get("id").map_err(|e| DbError::storage(&e))?,
        name: row.try_get("name").map_err(|e| DbError::storage(&e))?,
        provider,
        voice_id: row.try_get("voice_id").map_err(|e| DbError::storage(&e))?,
        settings: parse_json::<VoiceSettings>(&settings)?,
        description: row.try_get("description").map_err(|e| DbError::storage(&e))?,
        tags: parse_json(&tags)?,
        use_case: row.try_get("use_case").map_err(|e| DbError::storage(&e))?,
        is_active: row.try_get::<i64, _>("is_active").map_err(|e| DbError::storage(&e))? != 0,
        is_default: row.try_get::<i64, _>("is_default").map_err(|e| DbError::storage(&e))? != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        created_from_session_id: row
            .try_get("created_from_session_id")
            .map_err(|e| DbError::storage(&e))?,
        sample_audio_path: row.try_get("sample_audio_path").map_err(|e| DbError::storage(&e))?,
        sample_text: row.try_get("sample_text").map_err(|e| DbError::storage(&e))?,
    })
}

fn row_to_binding(row: &SqliteRow) -> DbResult<ModuleProfileBinding> {
    Ok(ModuleProfileBinding {
        module_id: row.try_get("module_id").map_err(|e| DbError::storage(&e))?,
        profile_id: row.try_get("profile_id").map_err(|e| DbError::storage(&e))?,
        context: row.try_get("context").map_err(|e| DbError::storage(&e))?,
        priority: row.try_get("priority").map_err(|e| DbError::storage(&e))?,
    })
}

#[async_trait]
impl ProfileRepository for SqliteProfileRepository {
    async fn create(&self, new_profile: NewProfile) -> DbResult<Profile> {
        if (self.get_by_name(&new_profile.name).await?).is_some() {
            return Err(DbError::policy_violation(format!(
                "a profile named '{}' already exists",
                new_profile.name
            )));
        }

        let now = Utc::now();
        let profile = Profile {
            id: Uuid::new_v4().to_string(),
            name: new_profile.name,
            provider: new_profile.provider,
            voice_id: new_profile.voice_id,
            settings: new_profile.settings,
            description: new_profile.description,
            tags: new_profile.tags,
            use_case: new_profile.use_case,
            is_active: true,
            is_default: false,
            created_at: now,
            updated_at: now,
            created_from_session_id: new_profile.created_from_session_id,
            sample_audio_path: None,
            sample_text: new_profile.sample_text,
        };

        let settings_json = to_json(&profile.settings)?;
        let tags_json = to_json(&profile.tags)?;

        sqlx::query(
            r#"INSERT INTO tts_profiles (
                id, name, provider, voice_id, settings, description, tags, use_case,
                is_active, is_default, created_at, updated_at, created_from_session_id,
                sample_audio_path, sample_text
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&profile.id)
        .bind(&profile.name)
        .bind(profile.provider.id())
        .bind(&profile.voice_id)
        .bind(&settings_json)
        .bind(&profile.description)
        .bind(&tags_json)
        .bind(&profile.use_case)
        .bind(profile.is_active as i64)
        .bind(profile.is_default as i64)
        .bind(profile.created_at.to_rfc3339())
        .bind(profile.updated_at.to_rfc3339())
        .bind(&profile.created_from_session_id)
        .bind(&profile.sample_audio_path)
        .bind(&profile.sample_text)
        .execute(&self.pool)
        .await?;

        Ok(profile)
    }

    async fn get(&self, id: &str) -> DbResult<Profile> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM tts_profiles WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("profile '{id}'")))?;
        row_to_profile(&row)
    }

    async fn get_by_name(&self, name: &str) -> DbResult<Option<Profile>> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM tts_profiles WHERE name = ?");
        let row = sqlx::query(&query).bind(name).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn list(&self, include_inactive: bool) -> DbResult<Vec<Profile>> {
        let query = if include_inactive {
            format!("SELECT {PROFILE_COLUMNS} FROM tts_profiles ORDER BY name")
        } else {
            format!("SELECT {PROFILE_COLUMNS} FROM tts_profiles WHERE is_active = 1 ORDER BY name")
        };
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_profile).collect()
    }

    async fn update(&self, profile: &Profile) -> DbResult<()> {
        let settings_json = to_json(&profile.settings)?;
        let tags_json = to_json(&profile.tags)?;
        sqlx::query(
            r#"UPDATE tts_profiles SET
                name = ?, provider = ?, voice_id = ?, settings = ?, description = ?, tags = ?,
                use_case = ?, is_active = ?, is_default = ?, updated_at = ?,
                sample_audio_path = ?, sample_text = ?
            WHERE id = ?"#,
        )
        .bind(&profile.name)
        .bind(profile.provider.id())
        .bind(&profile.voice_id)
        .bind(&settings_json)
        .bind(&profile.description)
        .bind(&tags_json)
        .bind(&profile.use_case)
        .bind(profile.is_active as i64)
        .bind(profile.is_default as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(&profile.sample_audio_path)
        .bind(&profile.sample_text)
        .bind(&profile.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_active(&self, id: &str, is_active: bool) -> DbResult<()> {
        sqlx::query("UPDATE tts_profiles SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active as i64)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_default(&self, id: &str) -> DbResult<()> {
        let profile = self.get(id).await?;
        if !profile.is_active {
            return Err(DbError::policy_violation("an inactive profile cannot be made default"));
        }
        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE tts_profiles SET is_default = 0")
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE tts_profiles SET is_default = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_default(&self) -> DbResult<Option<Profile>> {
        let query =
            format!("SELECT {PROFILE_COLUMNS} FROM tts_profiles WHERE is_default = 1 AND is_active = 1");
        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_profile).transpose()
    }

    async fn delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM tts_profiles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_binding(&self, binding: ModuleProfileBinding) -> DbResult<()> {
        sqlx::query(
            r#"INSERT INTO tts_module_profiles (module_id, profile_id, context, priority)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(module_id, profile_id, context) DO UPDATE SET
                   priority = excluded.priority"#,
        )
        .bind(&binding.module_id)
        .bind(&binding.profile_id)
        .bind(&binding.context)
        .bind(binding.priority)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn bindings_for_module(&self, module_id: &str) -> DbResult<Vec<ModuleProfileBinding>> {
        let rows = sqlx::query(
            "SELECT module_id, profile_id, context, priority FROM tts_module_profiles \
             WHERE module_id = ? ORDER BY priority DESC",
        )
        .bind(module_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_binding).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;

    fn new_profile(name: &str) -> NewProfile {
        NewProfile {
            name: name.to_string(),
            provider: Provider::Piper,
            voice_id: "nova".to_string(),
            settings: VoiceSettings::at_speed(1.0),
            description: None,
            tags: vec![],
            use_case: None,
            created_from_session_id: None,
            sample_text: None,
        }
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteProfileRepository::new(pool);
        let created = repo.create(new_profile("tutor-voice")).await.unwrap();
        let fetched = repo.get(&created.id).await.unwrap();
        assert_eq!(fetched.name, "tutor-voice");
        assert_eq!(fetched.provider, Provider::Piper);
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteProfileRepository::new(pool);
        repo.create(new_profile("dup")).await.unwrap();
        let err = repo.create(new_profile("dup")).await.unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[tokio::test]
    async fn only_one_active_default_at_a_time() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteProfileRepository::new(pool);
        let a = repo.create(new_profile("a")).await.unwrap();
        let b = repo.create(new_profile("b")).await.unwrap();
        repo.set_default(&a.id).await.unwrap();
        repo.set_default(&b.id).await.unwrap();

        let a_after = repo.get(&a.id).await.unwrap();
        let b_after = repo.get(&b.id).await.unwrap();
        assert!(!a_after.is_default);
        assert!(b_after.is_default);
    }

    #[tokio::test]
    async fn inactive_profile_cannot_become_default() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteProfileRepository::new(pool);
        let a = repo.create(new_profile("a")).await.unwrap();
        repo.set_active(&a.id, false).await.unwrap();
        let err = repo.set_default(&a.id).await.unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[tokio::test]
    async fn binding_resolution_orders_by_priority() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteProfileRepository::new(pool);
        let a = repo.create(new_profile("a")).await.unwrap();
        let b = repo.create(new_profile("b")).await.unwrap();
        repo.upsert_binding(ModuleProfileBinding {
            module_id: "m1".into(),
            profile_id: a.id.clone(),
            context: None,
            priority: 1,
        })
        .await
        .unwrap();
        repo.upsert_binding(ModuleProfileBinding {
            module_id: "m1".into(),
            profile_id: b.id.clone(),
            context: None,
            priority: 5,
        })
        .await
        .unwrap();

        let bindings = repo.bindings_for_module("m1").await.unwrap();
        assert_eq!(bindings[0].profile_id, b.id);
    }
}

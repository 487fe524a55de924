//! `SQLite`-backed persistence for comparison sessions, variants, and
//! ratings.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::{
    ComparisonConfiguration, ComparisonRating, ComparisonSample, ComparisonSession,
    ComparisonSessionStatus, ComparisonVariant, ComparisonVariantStatus, TtsConfig, VoiceSettings,
};

use super::row_mappers::{parse_json, parse_timestamp, to_json};

/// Fields required to create a new comparison session. The variant matrix
/// is materialized (one row per `(sample, configuration)` pair) as part of
/// creation and never changes size afterward.
#[derive(Clone, Debug)]
pub struct NewComparisonSession {
    pub name: String,
    pub samples: Vec<ComparisonSample>,
    pub configurations: Vec<ComparisonConfiguration>,
}

/// Port trait for comparison session/variant/rating persistence.
#[async_trait]
pub trait ComparisonRepository: Send + Sync {
    async fn create_session(&self, new_session: NewComparisonSession) -> DbResult<ComparisonSession>;
    async fn get_session(&self, id: &str) -> DbResult<ComparisonSession>;
    async fn list_sessions(&self) -> DbResult<Vec<ComparisonSession>>;
    async fn update_session_status(&self, id: &str, status: ComparisonSessionStatus) -> DbResult<()>;
    async fn delete_session(&self, id: &str) -> DbResult<bool>;

    async fn variants_for_session(&self, session_id: &str) -> DbResult<Vec<ComparisonVariant>>;
    async fn get_variant(&self, id: &str) -> DbResult<ComparisonVariant>;
    async fn update_variant(&self, variant: &ComparisonVariant) -> DbResult<()>;

    async fn upsert_rating(
        &self,
        variant_id: &str,
        rating: i64,
        notes: Option<String>,
    ) -> DbResult<ComparisonRating>;
    async fn ratings_for_session(&self, session_id: &str) -> DbResult<Vec<ComparisonRating>>;
}

/// `SQLite` implementation of [`ComparisonRepository`].
pub struct SqliteComparisonRepository {
    pool: SqlitePool,
}

impl SqliteComparisonRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SESSION_COLUMNS: &str = "id, name, status, samples, configurations, created_at, updated_at";
const VARIANT_COLUMNS: &str =
    "id, session_id, sample_index, config_index, tts_config, status, output_file, duration_seconds";
const RATING_COLUMNS: &str = "id, variant_id, rating, notes, created_at, updated_at";

fn row_to_session(row: &SqliteRow) -> DbResult<ComparisonSession> {
    let status: String = row.try_get("status").map_err(|e| DbError::storage(&e))?;
    let samples: String = row.try_get("samples").map_err(|e| DbError::storage(&e))?;
    let configurations: String = row.try_get("configurations").map_err(|e| DbError::storage(&e))?;
    let created_at: String = row.try_get("created_at").map_err(|e| DbError::storage(&e))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| DbError::storage(&e))?;

    Ok(ComparisonSession {
        id: row.try_get("id").map_err(|e| DbError::storage(&e))?,
        name: row.try_get("name").map_err(|e| DbError::storage(&e))?,
        status: ComparisonSessionStatus::parse(&status)
            .ok_or_else(|| DbError::storage(&sqlx::Error::ColumnNotFound(status.clone())))?,
        samples: parse_json(&samples)?,
        configurations: parse_json(&configurations)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_variant(row: &SqliteRow) -> DbResult<ComparisonVariant> {
    let status: String = row.try_get("status").map_err(|e| DbError::storage(&e))?;
    let tts_config: String = row.try_get("tts_config").map_err(|e| DbError::storage(&e))?;

    Ok(ComparisonVariant {
        id: row.try_get("id").map_err(|e| DbError::storage(&e))?,
        session_id: row.try_get("session_id").map_err(|e| DbError::storage(&e))?,
        sample_index: row.try_get("sample_index").map_err(|e| DbError::storage(&e))?,
        config_index: row.try_get("config_index").map_err(|e| DbError::storage(&e))?,
        tts_config: parse_json::<TtsConfig>(&tts_config)?,
        status: ComparisonVariantStatus::parse(&status)
            .ok_or_else(|| DbError::storage(&sqlx::Error::ColumnNotFound(status.clone())))?,
        output_file: row.try_get("output_file").map_err(|e| DbError::storage(&e))?,
        duration_seconds: row.try_get("duration_seconds").map_err(|e| DbError::storage(&e))?,
    })
}

fn row_to_rating(row: &SqliteRow) -> DbResult<ComparisonRating> {
    let created_at: String = row.try_get("created_at").map_err(|e| DbError::storage(&e))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| DbError::storage(&e))?;
    Ok(ComparisonRating {
        id: row.try_get("id").map_err(|e| DbError::storage(&e))?,
        variant_id: row.try_get("variant_id").map_err(|e| DbError::storage(&e))?,
        rating: row.try_get("rating").map_err(|e| DbError::storage(&e))?,
        notes: row.try_get("notes").map_err(|e| DbError::storage(&e))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl ComparisonRepository for SqliteComparisonRepository {
    async fn create_session(&self, new_session: NewComparisonSession) -> DbResult<ComparisonSession> {
        if new_session.samples.is_empty() {
            return Err(DbError::policy_violation("a comparison session requires at least one sample"));
        }
        if new_session.configurations.is_empty() {
            return Err(DbError::policy_violation(
                "a comparison session requires at least one configuration",
            ));
        }

        let now = Utc::now();
        let session = ComparisonSession {
            id: Uuid::new_v4().to_string(),
            name: new_session.name,
            status: ComparisonSessionStatus::Draft,
            samples: new_session.samples,
            configurations: new_session.configurations,
            created_at: now,
            updated_at: now,
        };

        let samples_json = to_json(&session.samples)?;
        let configurations_json = to_json(&session.configurations)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO tts_comparison_sessions
                (id, name, status, samples, configurations, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&session.id)
        .bind(&session.name)
        .bind(session.status.as_str())
        .bind(&samples_json)
        .bind(&configurations_json)
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        for (sample_index, _) in session.samples.iter().enumerate() {
            for (config_index, config) in session.configurations.iter().enumerate() {
                let tts_config = TtsConfig {
                    provider: config.provider,
                    voice_id: config.voice_id.clone(),
                    settings: config.settings.clone(),
                };
                let tts_config_json = to_json(&tts_config)?;
                sqlx::query(
                    r#"INSERT INTO tts_comparison_variants
                        (id, session_id, sample_index, config_index, tts_config, status)
                       VALUES (?, ?, ?, ?, ?, ?)"#,
                )
                .bind(Uuid::new_v4().to_string())
                .bind(&session.id)
                .bind(sample_index as i64)
                .bind(config_index as i64)
                .bind(&tts_config_json)
                .bind(ComparisonVariantStatus::Pending.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> DbResult<ComparisonSession> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM tts_comparison_sessions WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("comparison session '{id}'")))?;
        row_to_session(&row)
    }

    async fn list_sessions(&self) -> DbResult<Vec<ComparisonSession>> {
        let query =
            format!("SELECT {SESSION_COLUMNS} FROM tts_comparison_sessions ORDER BY created_at DESC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_session).collect()
    }

    async fn update_session_status(&self, id: &str, status: ComparisonSessionStatus) -> DbResult<()> {
        sqlx::query("UPDATE tts_comparison_sessions SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM tts_comparison_sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn variants_for_session(&self, session_id: &str) -> DbResult<Vec<ComparisonVariant>> {
        let query = format!(
            "SELECT {VARIANT_COLUMNS} FROM tts_comparison_variants \
             WHERE session_id = ? ORDER BY sample_index, config_index"
        );
        let rows = sqlx::query(&query).bind(session_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_variant).collect()
    }

    async fn get_variant(&self, id: &str) -> DbResult<ComparisonVariant> {
        let query = format!("SELECT {VARIANT_COLUMNS} FROM tts_comparison_variants WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("comparison variant '{id}'")))?;
        row_to_variant(&row)
    }

    async fn update_variant(&self, variant: &ComparisonVariant) -> DbResult<()> {
        sqlx::query(
            "UPDATE tts_comparison_variants SET status = ?, output_file = ?, duration_seconds = ? \
             WHERE id = ?",
        )
        .bind(variant.status.as_str())
        .bind(&variant.output_file)
        .bind(variant.duration_seconds)
        .bind(&variant.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_rating(
        &self,
        variant_id: &str,
        rating: i64,
        notes: Option<String>,
    ) -> DbResult<ComparisonRating> {
        if !(1..=5).contains(&rating) {
            return Err(DbError::policy_violation("rating must be between 1 and 5"));
        }
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            r#"INSERT INTO tts_comparison_ratings (id, variant_id, rating, notes, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(variant_id) DO UPDATE SET
                   rating = excluded.rating, notes = excluded.notes, updated_at = excluded.updated_at"#,
        )
        .bind(&id)
        .bind(variant_id)
        .bind(rating)
        .bind(&notes)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let query = format!("SELECT {RATING_COLUMNS} FROM tts_comparison_ratings WHERE variant_id = ?");
        let row = sqlx::query(&query)
            .bind(variant_id)
            .fetch_one(&self.pool)
            .await?;
        row_to_rating(&row)
    }

    async fn ratings_for_session(&self, session_id: &str) -> DbResult<Vec<ComparisonRating>> {
        let query = format!(
            "SELECT r.id, r.variant_id, r.rating, r.notes, r.created_at, r.updated_at \
             FROM tts_comparison_ratings r \
             JOIN tts_comparison_variants v ON v.id = r.variant_id \
             WHERE v.session_id = ?"
        );
        let rows = sqlx::query(&query).bind(session_id).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_rating).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::setup_test_database;
    use tts_core::Provider;

    fn new_session() -> NewComparisonSession {
        NewComparisonSession {
            name: "voice-bakeoff".to_string(),
            samples: vec![
                ComparisonSample { text: "Hello".to_string(), source_ref: None },
                ComparisonSample { text: "World".to_string(), source_ref: None },
            ],
            configurations: vec![
                ComparisonConfiguration {
                    name: "cfg-a".to_string(),
                    provider: Provider::Piper,
                    voice_id: "v1".to_string(),
                    settings: VoiceSettings::at_speed(1.0),
                },
                ComparisonConfiguration {
                    name: "cfg-b".to_string(),
                    provider: Provider::Vibevoice,
                    voice_id: "v2".to_string(),
                    settings: VoiceSettings::at_speed(1.1),
                },
                ComparisonConfiguration {
                    name: "cfg-c".to_string(),
                    provider: Provider::Chatterbox,
                    voice_id: "v3".to_string(),
                    settings: VoiceSettings::at_speed(0.9),
                },
            ],
        }
    }

    #[tokio::test]
    async fn variant_matrix_is_the_cartesian_product() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteComparisonRepository::new(pool);
        let session = repo.create_session(new_session()).await.unwrap();
        let variants = repo.variants_for_session(&session.id).await.unwrap();
        assert_eq!(variants.len(), 6);
    }

    #[tokio::test]
    async fn rating_upsert_replaces_existing_rating() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteComparisonRepository::new(pool);
        let session = repo.create_session(new_session()).await.unwrap();
        let variants = repo.variants_for_session(&session.id).await.unwrap();
        let variant_id = variants[0].id.clone();

        repo.upsert_rating(&variant_id, 3, None).await.unwrap();
        let updated = repo.upsert_rating(&variant_id, 5, Some("great".to_string())).await.unwrap();
        assert_eq!(updated.rating, 5);

        let ratings = repo.ratings_for_session(&session.id).await.unwrap();
        assert_eq!(ratings.len(), 1);
    }

    #[tokio::test]
    async fn rating_out_of_range_is_rejected() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteComparisonRepository::new(pool);
        let session = repo.create_session(new_session()).await.unwrap();
        let variants = repo.variants_for_session(&session.id).await.unwrap();
        let err = repo.upsert_rating(&variants[0].id, 9, None).await.unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[tokio::test]
    async fn empty_samples_rejected() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteComparisonRepository::new(pool);
        let mut session = new_session();
        session.samples.clear();
        let err = repo.create_session(session).await.unwrap_err();
        assert!(err.is_policy_violation());
    }
}

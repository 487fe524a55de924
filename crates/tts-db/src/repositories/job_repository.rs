//! `SQLite`-backed persistence for pre-gen jobs and their items.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use crate::models::{Job, JobItem, JobItemStatus, JobStatus, JobType, NewJobItem, TtsConfig};

use super::row_mappers::{parse_json, parse_optional_json, parse_optional_timestamp, parse_timestamp, to_json};

/// Everything needed to create a new job and its item backlog in one
/// transaction.
#[derive(Clone, Debug)]
pub struct NewJob {
    pub name: String,
    pub job_type: JobType,
    pub source_type: String,
    pub profile_id: Option<String>,
    pub tts_config: Option<TtsConfig>,
    pub output_dir: String,
    pub items: Vec<NewJobItem>,
}

/// Port trait for job/item persistence, so `tts-pregen`'s job engine can
/// be tested against an in-memory double without a real database.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create_job(&self, new_job: NewJob) -> DbResult<Job>;
    async fn get_job(&self, id: &str) -> DbResult<Job>;
    async fn list_jobs(&self) -> DbResult<Vec<Job>>;
    async fn update_job(&self, job: &Job) -> DbResult<()>;
    async fn delete_job(&self, id: &str) -> DbResult<bool>;

    async fn fetch_pending_items(&self, job_id: &str, limit: i64) -> DbResult<Vec<JobItem>>;
    async fn update_item(&self, item: &JobItem) -> DbResult<()>;
    async fn retry_failed_items(&self, job_id: &str) -> DbResult<i64>;
}

/// `SQLite` implementation of [`JobRepository`].
pub struct SqliteJobRepository {
    pool: SqlitePool,
}

impl SqliteJobRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const JOB_COLUMNS: &str = "id, name, job_type, status, source_type, profile_id, tts_config, \
     output_dir, total, completed, failed, current_index, current_text, created_at, \
     started_at, paused_at, completed_at, updated_at, last_error, consecutive_failures";

const JOB_ITEM_COLUMNS: &str = "id, job_id, item_index, text, text_hash, source_ref, status, \
     attempt_count, output_file, duration_seconds, file_size_bytes, sample_rate, last_error, \
     processing_started_at, processing_completed_at";

fn row_to_job(row: &SqliteRow) -> DbResult<Job> {
    let job_type: String = row.try_get("job_type").map_err(|e| DbError::storage(&e))?;
    let status: String = row.try_get("status").map_err(|e| DbError::storage(&e))?;
    let tts_config: Option<String> = row.try_get("tts_config").map_err(|e| DbError::storage(&e))?;
    let created_at: String = row.try_get("created_at").map_err(|e| DbError::storage(&e))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| DbError::storage(&e))?;
    let started_at: Option<String> = row.try_get("started_at").map_err(|e| DbError::storage(&e))?;
    let paused_at: Option<String> = row.try_get("paused_at").map_err(|e| DbError::storage(&e))?;
    let completed_at: Option<String> =
        row.try_get("completed_at").map_err(|e| DbError::storage(&e))?;

    Ok(Job {
        id: row.try_get("id").map_err(|e| DbError::storage(&e))?,
        name: row.try_get("name").map_err(|e| DbError::storage(&e))?,
        job_type: match job_type.as_str() {
            "batch" => JobType::Batch,
            "comparison" => JobType::Comparison,
            other => return Err(DbError::storage(&sqlx::Error::ColumnNotFound(other.to_string()))),
        },
        status: JobStatus::parse(&status)
            .ok_or_else(|| DbError::storage(&sqlx::Error::ColumnNotFound(status.clone())))?,
        source_type: row.try_get("source_type").map_err(|e| DbError::storage(&e))?,
        profile_id: row.try_get("profile_id").map_err(|e| DbError::storage(&e))?,
        tts_config: parse_optional_json::<TtsConfig>(tts_config)?,
        output_dir: row.try_get("output_dir").map_err(|e| DbError::storage(&e))?,
        total: row.try_get("total").map_err(|e| DbError::storage(&e))?,
        completed: row.try_get("completed").map_err(|e| DbError::storage(&e))?,
        failed: row.try_get("failed").map_err(|e| DbError::storage(&e))?,
        current_index: row.try_get("current_index").map_err(|e| DbError::storage(&e))?,
        current_text: row.try_get("current_text").map_err(|e| DbError::storage(&e))?,
        created_at: parse_timestamp(&created_at)?,
        started_at: parse_optional_timestamp(started_at)?,
        paused_at: parse_optional_timestamp(paused_at)?,
        completed_at: parse_optional_timestamp(completed_at)?,
        updated_at: parse_timestamp(&updated_at)?,
        last_error: row.try_get("last_error").map_err(|e| DbError::storage(&e))?,
        consecutive_failures: row
            .try_get("consecutive_failures")
            .map_err(|e| DbError::storage(&e))?,
    })
}

fn row_to_job_item(row: &SqliteRow) -> DbResult<JobItem> {
    let status: String = row.try_get("status").map_err(|e| DbError::storage(&e))?;
    let processing_started_at: Option<String> =
        row.try_get("processing_started_at").map_err(|e| DbError::storage(&e))?;
    let processing_completed_at: Option<String> =
        row.try_get("processing_completed_at").map_err(|e| DbError::storage(&e))?;

    Ok(JobItem {
        id: row.try_get("id").map_err(|e| DbError::storage(&e))?,
        job_id: row.try_get("job_id").map_err(|e| DbError::storage(&e))?,
        item_index: row.try_get("item_index").map_err(|e| DbError::storage(&e))?,
        text: row.try_get("text").map_err(|e| DbError::storage(&e))?,
        text_hash: row.try_get("text_hash").map_err(|e| DbError::storage(&e))?,
        source_ref: row.try_get("source_ref").map_err(|e| DbError::storage(&e))?,
        status: JobItemStatus::parse(&status)
            .ok_or_else(|| DbError::storage(&sqlx::Error::ColumnNotFound(status.clone())))?,
        attempt_count: row.try_get("attempt_count").map_err(|e| DbError::storage(&e))?,
        output_file: row.try_get("output_file").map_err(|e| DbError::storage(&e))?,
        duration_seconds: row.try_get("duration_seconds").map_err(|e| DbError::storage(&e))?,
        file_size_bytes: row.try_get("file_size_bytes").map_err(|e| DbError::storage(&e))?,
        sample_rate: row.try_get("sample_rate").map_err(|e| DbError::storage(&e))?,
        last_error: row.try_get("last_error").map_err(|e| DbError::storage(&e))?,
        processing_started_at: parse_optional_timestamp(processing_started_at)?,
        processing_completed_at: parse_optional_timestamp(processing_completed_at)?,
    })
}

fn text_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[async_trait]
impl JobRepository for SqliteJobRepository {
    async fn create_job(&self, new_job: NewJob) -> DbResult<Job> {
        if new_job.items.is_empty() {
            return Err(DbError::policy_violation("a job requires at least one item"));
        }
        if new_job.profile_id.is_some() == new_job.tts_config.is_some() {
            return Err(DbError::policy_violation(
                "exactly one of profile_id or tts_config must be set",
            ));
        }

        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4().to_string(),
            name: new_job.name,
            job_type: new_job.job_type,
            status: JobStatus::Pending,
            source_type: new_job.source_type,
            profile_id: new_job.profile_id,
            tts_config: new_job.tts_config,
            output_dir: new_job.output_dir,
            total: new_job.items.len() as i64,
            completed: 0,
            failed: 0,
            current_index: 0,
            current_text: None,
            created_at: now,
            started_at: None,
            paused_at: None,
            completed_at: None,
            updated_at: now,
            last_error: None,
            consecutive_failures: 0,
        };

        let tts_config_json = job.tts_config.as_ref().map(to_json).transpose()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO tts_pregen_jobs (
                id, name, job_type, status, source_type, profile_id, tts_config, output_dir,
                total, completed, failed, current_index, current_text, created_at, started_at,
                paused_at, completed_at, updated_at, last_error, consecutive_failures
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(match job.job_type {
            JobType::Batch => "batch",
            JobType::Comparison => "comparison",
        })
        .bind(job.status.as_str())
        .bind(&job.source_type)
        .bind(&job.profile_id)
        .bind(&tts_config_json)
        .bind(&job.output_dir)
        .bind(job.total)
        .bind(0i64)
        .bind(0i64)
        .bind(0i64)
        .bind(Option::<String>::None)
        .bind(job.created_at.to_rfc3339())
        .bind(Option::<String>::None)
        .bind(Option::<String>::None)
        .bind(Option::<String>::None)
        .bind(job.updated_at.to_rfc3339())
        .bind(Option::<String>::None)
        .bind(0i64)
        .execute(&mut *tx)
        .await?;

        for (index, item) in new_job.items.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO tts_pregen_job_items (
                    id, job_id, item_index, text, text_hash, source_ref, status, attempt_count
                ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)"#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&job.id)
            .bind(index as i64)
            .bind(&item.text)
            .bind(text_hash(&item.text))
            .bind(&item.source_ref)
            .bind(JobItemStatus::Pending.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(job)
    }

    async fn get_job(&self, id: &str) -> DbResult<Job> {
        let query = format!("SELECT {JOB_COLUMNS} FROM tts_pregen_jobs WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::not_found(format!("job '{id}'")))?;
        row_to_job(&row)
    }

    async fn list_jobs(&self) -> DbResult<Vec<Job>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM tts_pregen_jobs ORDER BY created_at DESC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job).collect()
    }

    async fn update_job(&self, job: &Job) -> DbResult<()> {
        let tts_config_json = job.tts_config.as_ref().map(to_json).transpose()?;
        sqlx::query(
            r#"UPDATE tts_pregen_jobs SET
                status = ?, tts_config = ?, total = ?, completed = ?, failed = ?,
                current_index = ?, current_text = ?, started_at = ?, paused_at = ?,
                completed_at = ?, updated_at = ?, last_error = ?, consecutive_failures = ?
            WHERE id = ?"#,
        )
        .bind(job.status.as_str())
        .bind(&tts_config_json)
        .bind(job.total)
        .bind(job.completed)
        .bind(job.failed)
        .bind(job.current_index)
        .bind(&job.current_text)
        .bind(job.started_at.map(|t| t.to_rfc3339()))
        .bind(job.paused_at.map(|t| t.to_rfc3339()))
        .bind(job.completed_at.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(&job.last_error)
        .bind(job.consecutive_failures)
        .bind(&job.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_job(&self, id: &str) -> DbResult<bool> {
        let result =
            sqlx::query("DELETE FROM tts_pregen_jobs WHERE id = ?").bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fetch_pending_items(&self, job_id: &str, limit: i64) -> DbResult<Vec<JobItem>> {
        let query = format!(
            "SELECT {JOB_ITEM_COLUMNS} FROM tts_pregen_job_items \
             WHERE job_id = ? AND status = 'pending' ORDER BY item_index ASC LIMIT ?"
        );
        let rows = sqlx::query(&query).bind(job_id).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_job_item).collect()
    }

    async fn update_item(&self, item: &JobItem) -> DbResult<()> {
        sqlx::query(
            r#"UPDATE tts_pregen_job_items SET
                status = ?, attempt_count = ?, output_file = ?, duration_seconds = ?,
                file_size_bytes = ?, sample_rate = ?, last_error = ?, processing_started_at = ?,
                processing_completed_at = ?
            WHERE id = ?"#,
        )
        .bind(item.status.as_str())
        .bind(item.attempt_count)
        .bind(&item.output_file)
        .bind(item.duration_seconds)
        .bind(item.file_size_bytes)
        .bind(item.sample_rate)
        .bind(&item.last_error)
        .bind(item.processing_started_at.map(|t| t.to_rfc3339()))
        .bind(item.processing_completed_at.map(|t| t.to_rfc3339()))
        .bind(&item.id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry_failed_items(&self, job_id: &str) -> DbResult<i64> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE tts_pregen_job_items SET status = 'pending', last_error = NULL \
             WHERE job_id = ? AND status = 'failed'",
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?;
        let reset = result.rows_affected() as i64;
        if reset > 0 {
            sqlx::query(
                "UPDATE tts_pregen_jobs SET failed = failed - ?, updated_at = ? WHERE id = ?",
            )
            .bind(reset)
            .bind(Utc::now().to_rfc3339())
            .bind(job_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VoiceSettings;
    use crate::setup::setup_test_database;
    use tts_core::Provider;

    fn sample_job(items: usize) -> NewJob {
        NewJob {
            name: "batch-1".to_string(),
            job_type: JobType::Batch,
            source_type: "curriculum".to_string(),
            profile_id: None,
            tts_config: Some(TtsConfig {
                provider: Provider::Piper,
                voice_id: "nova".to_string(),
                settings: VoiceSettings::at_speed(1.0),
            }),
            output_dir: "/tmp/jobs".to_string(),
            items: (0..items)
                .map(|i| NewJobItem { text: format!("segment {i}"), source_ref: None })
                .collect(),
        }
    }

    #[tokio::test]
    async fn create_job_persists_dense_item_indices() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteJobRepository::new(pool);
        let job = repo.create_job(sample_job(3)).await.unwrap();
        assert_eq!(job.total, 3);
        assert_eq!(job.pending(), 3);

        let items = repo.fetch_pending_items(&job.id, 10).await.unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].item_index, 0);
        assert_eq!(items[2].item_index, 2);
    }

    #[tokio::test]
    async fn requires_exactly_one_of_profile_or_config() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteJobRepository::new(pool);
        let mut job = sample_job(1);
        job.profile_id = Some("some-profile".to_string());
        let err = repo.create_job(job).await.unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[tokio::test]
    async fn empty_items_is_rejected() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteJobRepository::new(pool);
        let err = repo.create_job(sample_job(0)).await.unwrap_err();
        assert!(err.is_policy_violation());
    }

    #[tokio::test]
    async fn retry_failed_items_resets_status_and_decrements_failed_counter() {
        let pool = setup_test_database().await.unwrap();
        let repo = SqliteJobRepository::new(pool);
        let mut job = repo.create_job(sample_job(2)).await.unwrap();
        let mut items = repo.fetch_pending_items(&job.id, 10).await.unwrap();
        items[0].status = JobItemStatus::Failed;
        repo.update_item(&items[0]).await.unwrap();
        job.failed = 1;
        repo.update_job(&job).await.unwrap();

        let reset = repo.retry_failed_items(&job.id).await.unwrap();
        assert_eq!(reset, 1);
        let pending = repo.fetch_pending_items(&job.id, 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        let refetched = repo.get_job(&job.id).await.unwrap();
        assert_eq!(refetched.failed, 0);
    }

    #[tokio::test]
    async fn deleting_job_cascades_to_items() {
        let pool = setup_test_database().await.unwrap();
        sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await.unwrap();
        let repo = SqliteJobRepository::new(pool.clone());
        let job = repo.create_job(sample_job(2)).await.unwrap();
        assert!(repo.delete_job(&job.id).await.unwrap());

        let remaining: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tts_pregen_job_items WHERE job_id = ?")
                .bind(&job.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(remaining.0, 0);
    }
}

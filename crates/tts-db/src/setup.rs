//! Database setup and schema initialization: one function establishes
//! the connection, the other issues idempotent DDL.

use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;

use crate::error::DbResult;

/// Connect to (creating if necessary) the `SQLite` database at `db_path`
/// and ensure the full schema exists. Safe to call on every process start.
pub async fn setup_database(db_path: &Path) -> DbResult<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::error::DbError::storage(&sqlx::Error::Io(e))
            })?;
        }
    }

    let pool = SqlitePool::connect_with(
        SqliteConnectOptions::new().filename(db_path).create_if_missing(true),
    )
    .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Build an in-memory database with the full schema, for tests.
#[cfg(any(test, feature = "test-utils"))]
pub async fn setup_test_database() -> DbResult<SqlitePool> {
    let pool = SqlitePool::connect("sqlite::memory:").await?;
    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table and index this crate owns. Every statement uses
/// `IF NOT EXISTS`, so this is idempotent and safe to call on every boot.
async fn create_schema(pool: &SqlitePool) -> DbResult<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_profiles (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            provider TEXT NOT NULL,
            voice_id TEXT NOT NULL,
            settings TEXT NOT NULL,
            description TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            use_case TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            is_default INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            created_from_session_id TEXT,
            sample_audio_path TEXT,
            sample_text TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_profiles_default \
         ON tts_profiles(is_default) WHERE is_default = 1",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_module_profiles (
            module_id TEXT NOT NULL,
            profile_id TEXT NOT NULL REFERENCES tts_profiles(id) ON DELETE CASCADE,
            context TEXT,
            priority INTEGER NOT NULL DEFAULT 0,
            UNIQUE(module_id, profile_id, context)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_module_profiles_module ON tts_module_profiles(module_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_pregen_jobs (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL,
            source_type TEXT NOT NULL,
            profile_id TEXT REFERENCES tts_profiles(id) ON DELETE SET NULL,
            tts_config TEXT,
            output_dir TEXT NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            current_index INTEGER NOT NULL DEFAULT 0,
            current_text TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            paused_at TEXT,
            completed_at TEXT,
            updated_at TEXT NOT NULL,
            last_error TEXT,
            consecutive_failures INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_pregen_job_items (
            id TEXT PRIMARY KEY,
            job_id TEXT NOT NULL REFERENCES tts_pregen_jobs(id) ON DELETE CASCADE,
            item_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            text_hash TEXT NOT NULL,
            source_ref TEXT,
            status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL DEFAULT 0,
            output_file TEXT,
            duration_seconds REAL,
            file_size_bytes INTEGER,
            sample_rate INTEGER,
            last_error TEXT,
            processing_started_at TEXT,
            processing_completed_at TEXT,
            UNIQUE(job_id, item_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_items_job_status ON tts_pregen_job_items(job_id, status)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_comparison_sessions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            samples TEXT NOT NULL,
            configurations TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_comparison_variants (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES tts_comparison_sessions(id) ON DELETE CASCADE,
            sample_index INTEGER NOT NULL,
            config_index INTEGER NOT NULL,
            tts_config TEXT NOT NULL,
            status TEXT NOT NULL,
            output_file TEXT,
            duration_seconds REAL,
            UNIQUE(session_id, sample_index, config_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tts_comparison_ratings (
            id TEXT PRIMARY KEY,
            variant_id TEXT NOT NULL UNIQUE REFERENCES tts_comparison_variants(id) ON DELETE CASCADE,
            rating INTEGER NOT NULL,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

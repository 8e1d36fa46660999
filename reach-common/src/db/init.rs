//! Database initialization
//!
//! Opens (or creates) the SQLite database and creates every table the sync
//! engine reads or writes. Table creation is idempotent and safe to run on
//! every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // WAL allows concurrent readers with one writer during a sync pass
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 250")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Open a private in-memory database with the full schema
///
/// Single connection: every handle of the returned pool sees the same data.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all engine tables and indexes
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(pool)
        .await?;

    create_contacts_table(pool).await?;
    create_sync_change_log_table(pool).await?;
    create_field_enrichment_history_table(pool).await?;
    create_field_confidence_log_table(pool).await?;
    create_enrichment_jobs_table(pool).await?;
    create_sync_jobs_table(pool).await?;

    Ok(())
}

async fn create_contacts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS contacts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            username TEXT,
            bio TEXT,
            location TEXT,
            profile_url TEXT,
            email TEXT,
            name TEXT,
            phone TEXT,
            confidence REAL,
            confidence_email REAL,
            confidence_name REAL,
            confidence_bio REAL,
            confidence_phone REAL,
            confidence_location REAL,
            confidence_username REAL,
            metadata TEXT NOT NULL DEFAULT '{}',
            outdated_fields TEXT NOT NULL DEFAULT '[]',
            sync_status TEXT NOT NULL DEFAULT 'synced'
                CHECK (sync_status IN ('synced', 'outdated', 'partial')),
            last_sync_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_contacts_user_updated ON contacts(user_id, updated_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sync_change_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_change_log (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            contact_id TEXT NOT NULL REFERENCES contacts(id),
            field_name TEXT NOT NULL,
            old_value TEXT,
            new_value TEXT,
            confidence_before REAL NOT NULL,
            confidence_after REAL,
            change_source TEXT NOT NULL
                CHECK (change_source IN ('scrape', 'import', 'webhook', 'manual')),
            sync_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (sync_status IN ('pending', 'processing', 'completed', 'failed')),
            enrichment_job_id TEXT,
            error_message TEXT,
            retry_of TEXT,
            detected_at TEXT NOT NULL,
            processed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_change_log_contact_status ON sync_change_log(user_id, contact_id, sync_status)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_field_enrichment_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_enrichment_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            contact_id TEXT NOT NULL REFERENCES contacts(id),
            field_name TEXT NOT NULL,
            enrichment_method TEXT NOT NULL,
            confidence_score REAL NOT NULL,
            data_source TEXT NOT NULL,
            enriched_value TEXT,
            enrichment_metadata TEXT NOT NULL DEFAULT '{}',
            enriched_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_field_confidence_log_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS field_confidence_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT NOT NULL,
            contact_id TEXT NOT NULL,
            field_name TEXT NOT NULL,
            confidence_score REAL NOT NULL,
            method TEXT NOT NULL,
            source_type TEXT NOT NULL,
            logged_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_enrichment_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enrichment_jobs (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            job_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'running', 'completed', 'partial', 'failed', 'cancelled')),
            priority TEXT NOT NULL DEFAULT 'normal',
            target_table TEXT NOT NULL,
            target_id TEXT,
            parameters TEXT NOT NULL DEFAULT '{}',
            progress INTEGER NOT NULL DEFAULT 0 CHECK (progress BETWEEN 0 AND 100),
            results TEXT NOT NULL DEFAULT '{}',
            error_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sync_jobs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_jobs (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            schedule TEXT,
            enabled INTEGER NOT NULL DEFAULT 1,
            days_back INTEGER NOT NULL DEFAULT 7,
            total_runs INTEGER NOT NULL DEFAULT 0,
            successful_runs INTEGER NOT NULL DEFAULT 0,
            failed_runs INTEGER NOT NULL DEFAULT 0,
            avg_duration_ms REAL NOT NULL DEFAULT 0,
            last_run_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

//! Database initialization tests

use reach_common::db::init::{init_database, open_in_memory};
use tempfile::TempDir;

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("reach.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("reach.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());
}

#[tokio::test]
async fn test_all_engine_tables_exist() {
    let pool = open_in_memory().await.unwrap();
    let tables = table_names(&pool).await;

    for expected in [
        "contacts",
        "enrichment_jobs",
        "field_confidence_log",
        "field_enrichment_history",
        "sync_change_log",
        "sync_jobs",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_change_log_rejects_unknown_status() {
    let pool = open_in_memory().await.unwrap();

    sqlx::query(
        "INSERT INTO contacts (id, user_id, created_at, updated_at) VALUES ('c1', 'u1', '2026-01-01T00:00:00.000000Z', '2026-01-01T00:00:00.000000Z')",
    )
    .execute(&pool)
    .await
    .unwrap();

    let result = sqlx::query(
        r#"
        INSERT INTO sync_change_log
            (id, user_id, contact_id, field_name, confidence_before, change_source, sync_status, detected_at)
        VALUES ('x', 'u1', 'c1', 'email', 0.5, 'scrape', 'bogus', '2026-01-01T00:00:00.000000Z')
        "#,
    )
    .execute(&pool)
    .await;

    assert!(result.is_err(), "CHECK constraint should reject unknown sync_status");
}

//! Database initialization
//!
//! Opens (creating if needed) the SQLite database and creates the orchestrator
//! tables. Table creation is idempotent and runs on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every connection
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create all orchestrator tables (idempotent)
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    create_backend_tables(pool).await?;
    create_task_tables(pool).await?;
    create_media_tables(pool).await?;

    info!("Database tables initialized");
    Ok(())
}

async fn create_backend_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS backends (
            backend_id INTEGER PRIMARY KEY,
            endpoint TEXT NOT NULL,
            enabled INTEGER NOT NULL DEFAULT 1,
            description TEXT,
            default_data_groups TEXT NOT NULL DEFAULT '["basic"]'
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS backend_capabilities (
            backend_id INTEGER NOT NULL REFERENCES backends(backend_id) ON DELETE CASCADE,
            capability TEXT NOT NULL,
            PRIMARY KEY (backend_id, capability)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_task_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            task_id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_type INTEGER NOT NULL,
            owner INTEGER,
            parameters TEXT,
            created_ms INTEGER NOT NULL,
            updated_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per task x backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_backends (
            task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            backend_id INTEGER NOT NULL,
            status INTEGER NOT NULL,
            message TEXT,
            updated_ms INTEGER NOT NULL,
            PRIMARY KEY (task_id, backend_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_metadata (
            task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (task_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS task_media (
            task_id INTEGER NOT NULL REFERENCES tasks(task_id) ON DELETE CASCADE,
            list_kind TEXT NOT NULL,
            guid TEXT NOT NULL,
            position INTEGER NOT NULL,
            PRIMARY KEY (task_id, list_kind, guid)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_media_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_items (
            guid TEXT PRIMARY KEY,
            owner INTEGER,
            service_type INTEGER,
            visibility INTEGER NOT NULL DEFAULT 1,
            url TEXT,
            updated_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_objects (
            media_object_id TEXT PRIMARY KEY,
            backend_id INTEGER,
            object_id TEXT NOT NULL,
            owner INTEGER NOT NULL,
            media_type INTEGER NOT NULL,
            status INTEGER NOT NULL,
            value TEXT,
            name TEXT,
            confidence REAL,
            rank INTEGER,
            visibility INTEGER NOT NULL,
            shape TEXT,
            timecodes TEXT,
            updated_ms INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_media_objects_origin ON media_objects(backend_id, object_id)",
    )
    .execute(pool)
    .await?;

    // Associations between items and objects
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS item_objects (
            guid TEXT NOT NULL REFERENCES media_items(guid) ON DELETE CASCADE,
            media_object_id TEXT NOT NULL REFERENCES media_objects(media_object_id) ON DELETE CASCADE,
            PRIMARY KEY (guid, media_object_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Per-item processing history, one row per task x item x backend
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS media_status (
            task_id INTEGER NOT NULL,
            guid TEXT NOT NULL,
            backend_id INTEGER NOT NULL,
            status INTEGER NOT NULL,
            message TEXT,
            updated_ms INTEGER NOT NULL,
            PRIMARY KEY (task_id, guid, backend_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

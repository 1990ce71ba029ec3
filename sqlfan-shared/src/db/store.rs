//! Embedded local store
//!
//! A single SQLite file hosts every model table plus one dynamic result
//! table per task statement. The store is opened exactly once per process
//! and tuned for mixed write load:
//!
//! - journal mode WAL
//! - synchronous NORMAL
//! - busy timeout 5000 ms
//! - page cache ≈ 2 MB
//!
//! Schema migration at startup is additive only: tables are created when
//! missing and new columns are added to existing tables; nothing is ever
//! dropped or rewritten.
//!
//! # Example
//!
//! ```no_run
//! use sqlfan_shared::db::store::{open_store, StoreConfig};
//!
//! # async fn example() -> Result<(), sqlx::Error> {
//! let pool = open_store(&StoreConfig::default()).await?;
//! let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await?;
//! # Ok(())
//! # }
//! ```

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the local store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the database file
    pub path: PathBuf,

    /// Pool size; the store is effectively single-writer, a handful of
    /// connections serves the read side
    pub max_connections: u32,

    /// SQLite busy timeout
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("./data/app.db"),
            max_connections: 10,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Opens the local store and runs the additive schema migration.
///
/// # Errors
///
/// Returns an error when the data directory cannot be created, the file
/// cannot be opened, or a migration statement fails. Callers are expected
/// to treat this as fatal.
pub async fn open_store(config: &StoreConfig) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
        }
    }

    info!(path = %config.path.display(), "Opening local store");

    let options = SqliteConnectOptions::new()
        .filename(&config.path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(config.busy_timeout)
        .pragma("cache_size", "-2000");

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await?;

    ensure_schema(&pool).await?;

    info!("Local store ready");
    Ok(pool)
}

/// Opens an in-memory store for tests.
pub async fn open_memory_store() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    ensure_schema(&pool).await?;
    Ok(pool)
}

/// Creates missing tables and adds missing columns. Never destructive.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    debug!("Running additive schema migration");

    let tables = [
        r#"
        CREATE TABLE IF NOT EXISTS instances (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            name          TEXT NOT NULL UNIQUE,
            host          TEXT NOT NULL,
            port          INTEGER NOT NULL,
            username      TEXT NOT NULL,
            password      TEXT NOT NULL,
            version       TEXT NOT NULL DEFAULT '',
            params        TEXT NOT NULL DEFAULT '[]',
            remark        TEXT NOT NULL DEFAULT '',
            sync_interval INTEGER NOT NULL DEFAULT 0,
            last_sync_at  TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS databases (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            instance_id   INTEGER NOT NULL,
            name          TEXT NOT NULL,
            character_set TEXT NOT NULL DEFAULT 'utf8mb4',
            collation     TEXT NOT NULL DEFAULT 'utf8mb4_general_ci',
            size          INTEGER NOT NULL DEFAULT 0,
            table_count   INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS query_tasks (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            task_name      TEXT NOT NULL UNIQUE,
            description    TEXT NOT NULL DEFAULT '',
            databases      TEXT NOT NULL DEFAULT '[]',
            status         INTEGER NOT NULL DEFAULT 0,
            total_dbs      INTEGER NOT NULL DEFAULT 0,
            completed_dbs  INTEGER NOT NULL DEFAULT 0,
            failed_dbs     INTEGER NOT NULL DEFAULT 0,
            total_sqls     INTEGER NOT NULL DEFAULT 0,
            completed_sqls INTEGER NOT NULL DEFAULT 0,
            failed_sqls    INTEGER NOT NULL DEFAULT 0,
            started_at     TEXT,
            completed_at   TEXT,
            is_favorite    INTEGER NOT NULL DEFAULT 0
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS query_task_sqls (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at          TEXT NOT NULL,
            updated_at          TEXT NOT NULL,
            task_id             INTEGER NOT NULL,
            sql_order           INTEGER NOT NULL,
            sql_content         TEXT NOT NULL,
            result_table_name   TEXT NOT NULL,
            result_table_schema TEXT NOT NULL,
            total_dbs           INTEGER NOT NULL DEFAULT 0,
            completed_dbs       INTEGER NOT NULL DEFAULT 0,
            failed_dbs          INTEGER NOT NULL DEFAULT 0,
            started_at          TEXT,
            completed_at        TEXT,
            UNIQUE (task_id, sql_order)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS query_task_executions (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            task_id        INTEGER NOT NULL,
            sql_id         INTEGER NOT NULL,
            instance_id    INTEGER NOT NULL,
            database_name  TEXT NOT NULL,
            status         INTEGER NOT NULL DEFAULT 0,
            error_message  TEXT NOT NULL DEFAULT '',
            result_count   INTEGER,
            execution_time INTEGER,
            started_at     TEXT,
            completed_at   TEXT,
            UNIQUE (sql_id, instance_id, database_name)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS db_doc_tasks (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL,
            task_name     TEXT NOT NULL DEFAULT '',
            instance_id   INTEGER NOT NULL,
            database_name TEXT NOT NULL,
            is_enable     INTEGER NOT NULL DEFAULT 0,
            sync_interval INTEGER NOT NULL DEFAULT 0,
            last_doc_at   TEXT
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS configs (
            c_key   TEXT PRIMARY KEY,
            c_value TEXT NOT NULL
        )
        "#,
    ];

    for ddl in tables {
        sqlx::query(ddl).execute(pool).await?;
    }

    let indexes = [
        "CREATE INDEX IF NOT EXISTS idx_databases_instance_id ON databases (instance_id)",
        "CREATE INDEX IF NOT EXISTS idx_task_sqls_task_id ON query_task_sqls (task_id)",
        "CREATE INDEX IF NOT EXISTS idx_executions_task_id ON query_task_executions (task_id)",
        "CREATE INDEX IF NOT EXISTS idx_executions_sql_id ON query_task_executions (sql_id)",
    ];
    for ddl in indexes {
        sqlx::query(ddl).execute(pool).await?;
    }

    // columns added after the initial schema shipped
    ensure_column(pool, "query_tasks", "is_favorite", "INTEGER NOT NULL DEFAULT 0").await?;
    ensure_column(pool, "instances", "sync_interval", "INTEGER NOT NULL DEFAULT 0").await?;
    ensure_column(pool, "instances", "last_sync_at", "TEXT").await?;
    ensure_column(pool, "db_doc_tasks", "task_name", "TEXT NOT NULL DEFAULT ''").await?;

    Ok(())
}

/// Adds a column when the table exists without it.
async fn ensure_column(
    pool: &SqlitePool,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<(), sqlx::Error> {
    let columns: Vec<(i64, String, String, i64, Option<String>, i64)> =
        sqlx::query_as(&format!("PRAGMA table_info({})", table))
            .fetch_all(pool)
            .await?;

    if columns.iter().any(|(_, name, ..)| name == column) {
        return Ok(());
    }

    info!(table, column, "Adding missing column");
    sqlx::query(&format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table, column, definition
    ))
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_store_creates_schema() {
        let pool = open_memory_store().await.unwrap();

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM query_tasks")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_migration_is_idempotent() {
        let pool = open_memory_store().await.unwrap();
        ensure_schema(&pool).await.unwrap();
        ensure_schema(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_column_adds_once() {
        let pool = open_memory_store().await.unwrap();
        ensure_column(&pool, "configs", "c_note", "TEXT").await.unwrap();
        ensure_column(&pool, "configs", "c_note", "TEXT").await.unwrap();

        sqlx::query("INSERT INTO configs (c_key, c_value, c_note) VALUES ('k', 'v', 'n')")
            .execute(&pool)
            .await
            .unwrap();
    }
}

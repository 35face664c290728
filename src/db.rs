//! SQLite pool construction and schema migration.
//!
//! The schema is created idempotently at startup. The `sessions` table gained
//! its `status` / `finished_at` / `exit_code` columns after the first release,
//! so [`migrate`] also runs an additive column pass against existing
//! databases: `PRAGMA table_info` tells us which columns are present and
//! `ALTER TABLE ADD COLUMN` fills in the gaps.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

/// Open (creating if missing) the SQLite database behind `database_url`.
pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options: SqliteConnectOptions = database_url.parse()?;
    let options = options
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
}

/// Create tables and apply the additive session-column migration.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS session_profiles (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            command TEXT NOT NULL,
            args TEXT NOT NULL DEFAULT '[]',
            cwd TEXT,
            env_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            profile_id INTEGER NOT NULL REFERENCES session_profiles(id),
            cwd TEXT,
            log_path TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    ensure_session_columns(pool).await
}

/// Add the lifecycle columns to `sessions` where an older database lacks them.
async fn ensure_session_columns(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let rows = sqlx::query("PRAGMA table_info('sessions')")
        .fetch_all(pool)
        .await?;
    let existing: Vec<String> = rows
        .iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();

    if !existing.iter().any(|c| c == "status") {
        sqlx::query("ALTER TABLE sessions ADD COLUMN status TEXT NOT NULL DEFAULT 'running'")
            .execute(pool)
            .await?;
    }
    if !existing.iter().any(|c| c == "finished_at") {
        sqlx::query("ALTER TABLE sessions ADD COLUMN finished_at TEXT")
            .execute(pool)
            .await?;
    }
    if !existing.iter().any(|c| c == "exit_code") {
        sqlx::query("ALTER TABLE sessions ADD COLUMN exit_code INTEGER")
            .execute(pool)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let pool = memory_pool().await;
        migrate(&pool).await.unwrap();
        migrate(&pool).await.unwrap();

        // The additive pass must have left all three lifecycle columns in place.
        let rows = sqlx::query("PRAGMA table_info('sessions')")
            .fetch_all(&pool)
            .await
            .unwrap();
        let columns: Vec<String> = rows.iter().map(|r| r.get::<String, _>("name")).collect();
        for expected in ["status", "finished_at", "exit_code"] {
            assert!(columns.iter().any(|c| c == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn migrate_upgrades_a_pre_lifecycle_schema() {
        let pool = memory_pool().await;
        sqlx::query(
            "CREATE TABLE sessions (
                id TEXT PRIMARY KEY,
                profile_id INTEGER NOT NULL,
                cwd TEXT,
                log_path TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        migrate(&pool).await.unwrap();

        sqlx::query("INSERT INTO sessions (id, profile_id, log_path, created_at) VALUES ('s', 1, 'l', 'now')")
            .execute(&pool)
            .await
            .unwrap();
        let status: String = sqlx::query("SELECT status FROM sessions WHERE id = 's'")
            .fetch_one(&pool)
            .await
            .unwrap()
            .get("status");
        assert_eq!(status, "running");
    }
}

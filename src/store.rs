//! Durable rows and queries for profiles and session records.
//!
//! All timestamps are stored as RFC 3339 TEXT in UTC, so `ORDER BY created_at`
//! sorts chronologically. Terminal session updates are guarded with
//! `WHERE status = 'running'`: once a record reaches a terminal status it is
//! frozen, which is what makes crash recovery and the explicit-termination /
//! natural-exit race benign.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use thiserror::Error;

/// Lifecycle status of a session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Completed,
    Stopped,
    Error,
    Interrupted,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Interrupted => "interrupted",
        }
    }

    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// A stored session profile: what to run and where.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProfileRow {
    pub id: i64,
    pub name: String,
    pub command: String,
    /// JSON array of argument strings.
    pub args: String,
    pub cwd: Option<String>,
    /// JSON object of environment overrides.
    pub env_json: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ProfileRow {
    /// Decode the `args` column; malformed JSON yields an empty vector.
    pub fn args_list(&self) -> Vec<String> {
        serde_json::from_str(&self.args).unwrap_or_default()
    }

    /// Decode the `env_json` column; malformed JSON yields an empty map.
    pub fn env_map(&self) -> HashMap<String, String> {
        serde_json::from_str(&self.env_json).unwrap_or_default()
    }
}

/// A stored session record.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SessionRow {
    pub id: String,
    pub profile_id: i64,
    pub cwd: Option<String>,
    pub log_path: String,
    pub created_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub exit_code: Option<i64>,
}

/// Fields of a profile update; `None` leaves the column unchanged.
#[derive(Debug, Default)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub command: Option<String>,
    pub args: Option<Vec<String>>,
    pub cwd: Option<String>,
    pub env: Option<HashMap<String, String>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint on `session_profiles.name` violated.
    #[error("配置名称已存在")]
    DuplicateName,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

fn map_unique(e: sqlx::Error) -> StoreError {
    if e.as_database_error()
        .is_some_and(sqlx::error::DatabaseError::is_unique_violation)
    {
        StoreError::DuplicateName
    } else {
        StoreError::Db(e)
    }
}

fn now() -> String {
    // Fixed precision keeps lexicographic TEXT ordering chronological.
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

/// Query façade over the SQLite pool. Cloneable — clones share the pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ─── Profiles ────────────────────────────────────────────────────────────

    pub async fn list_profiles(&self) -> Result<Vec<ProfileRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM session_profiles ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_profile(&self, id: i64) -> Result<Option<ProfileRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM session_profiles WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn create_profile(
        &self,
        name: &str,
        command: &str,
        args: &[String],
        cwd: Option<&str>,
        env: &HashMap<String, String>,
    ) -> Result<ProfileRow, StoreError> {
        let ts = now();
        let result = sqlx::query(
            "INSERT INTO session_profiles (name, command, args, cwd, env_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(command)
        .bind(serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string()))
        .bind(cwd)
        .bind(serde_json::to_string(env).unwrap_or_else(|_| "{}".to_string()))
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await
        .map_err(map_unique)?;

        let row = self
            .get_profile(result.last_insert_rowid())
            .await?
            .ok_or(sqlx::Error::RowNotFound)?;
        Ok(row)
    }

    pub async fn update_profile(
        &self,
        id: i64,
        changes: ProfileChanges,
    ) -> Result<Option<ProfileRow>, StoreError> {
        let Some(existing) = self.get_profile(id).await? else {
            return Ok(None);
        };

        let name = changes.name.unwrap_or(existing.name);
        let command = changes.command.unwrap_or(existing.command);
        let args = changes
            .args
            .map(|a| serde_json::to_string(&a).unwrap_or_else(|_| "[]".to_string()))
            .unwrap_or(existing.args);
        let cwd = changes.cwd.or(existing.cwd);
        let env_json = changes
            .env
            .map(|e| serde_json::to_string(&e).unwrap_or_else(|_| "{}".to_string()))
            .unwrap_or(existing.env_json);

        sqlx::query(
            "UPDATE session_profiles
             SET name = ?, command = ?, args = ?, cwd = ?, env_json = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&name)
        .bind(&command)
        .bind(&args)
        .bind(&cwd)
        .bind(&env_json)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(map_unique)?;

        Ok(self.get_profile(id).await?)
    }

    /// Returns false when no profile with that id existed.
    pub async fn delete_profile(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM session_profiles WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert the default profile iff no profile with `name` exists.
    pub async fn seed_default_profile(
        &self,
        name: &str,
        command: &str,
        cwd: &str,
    ) -> Result<(), sqlx::Error> {
        let exists: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM session_profiles WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        if exists.is_some() {
            return Ok(());
        }
        let ts = now();
        sqlx::query(
            "INSERT INTO session_profiles (name, command, args, cwd, env_json, created_at, updated_at)
             VALUES (?, ?, '[]', ?, '{}', ?, ?)",
        )
        .bind(name)
        .bind(command)
        .bind(cwd)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ─── Session records ─────────────────────────────────────────────────────

    pub async fn insert_session(
        &self,
        id: &str,
        profile_id: i64,
        cwd: Option<&str>,
        log_path: &str,
    ) -> Result<SessionRow, sqlx::Error> {
        sqlx::query(
            "INSERT INTO sessions (id, profile_id, cwd, log_path, created_at, status)
             VALUES (?, ?, ?, ?, ?, 'running')",
        )
        .bind(id)
        .bind(profile_id)
        .bind(cwd)
        .bind(log_path)
        .bind(now())
        .execute(&self.pool)
        .await?;

        self.get_session(id).await?.ok_or(sqlx::Error::RowNotFound)
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<SessionRow>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// All session records joined with their profile, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<(SessionRow, ProfileRow)>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT s.id, s.profile_id, s.cwd, s.log_path, s.created_at, s.finished_at,
                    s.status, s.exit_code,
                    p.id AS p_id, p.name AS p_name, p.command AS p_command, p.args AS p_args,
                    p.cwd AS p_cwd, p.env_json AS p_env_json,
                    p.created_at AS p_created_at, p.updated_at AS p_updated_at
             FROM sessions s
             JOIN session_profiles p ON s.profile_id = p.id
             ORDER BY s.created_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let record = SessionRow {
                    id: row.get("id"),
                    profile_id: row.get("profile_id"),
                    cwd: row.get("cwd"),
                    log_path: row.get("log_path"),
                    created_at: row.get("created_at"),
                    finished_at: row.get("finished_at"),
                    status: row.get("status"),
                    exit_code: row.get("exit_code"),
                };
                let profile = ProfileRow {
                    id: row.get("p_id"),
                    name: row.get("p_name"),
                    command: row.get("p_command"),
                    args: row.get("p_args"),
                    cwd: row.get("p_cwd"),
                    env_json: row.get("p_env_json"),
                    created_at: row.get("p_created_at"),
                    updated_at: row.get("p_updated_at"),
                };
                (record, profile)
            })
            .collect())
    }

    /// Returns false when no session with that id existed.
    pub async fn delete_session(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Move a running record to a terminal status.
    ///
    /// No-op when the record is missing (already deleted) or already terminal,
    /// so concurrent finalizers cannot overwrite each other.
    pub async fn finish_session(
        &self,
        id: &str,
        status: SessionStatus,
        exit_code: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sessions
             SET status = ?, exit_code = COALESCE(?, exit_code), finished_at = ?
             WHERE id = ? AND status = 'running'",
        )
        .bind(status.as_str())
        .bind(exit_code)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Crash recovery: flip every `running` record left over from a previous
    /// process lifetime to `interrupted`. Returns the number of rows touched.
    pub async fn mark_orphan_sessions(&self) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET status = 'interrupted', finished_at = ? WHERE status = 'running'",
        )
        .bind(now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

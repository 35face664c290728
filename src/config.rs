//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `TERMHUB_LISTEN`, `TERMHUB_BASE_DIR`,
//!    `TERMHUB_DATA_DIR`, `TERMHUB_LOGS_DIR`, `TERMHUB_DATABASE_URL`,
//!    `TERMHUB_DEFAULT_CWD`
//! 2. **Config file** — path via `--config <path>`, or `termhub.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! listen = "0.0.0.0:8000"
//! max_connections = 256
//!
//! [storage]
//! base_dir = "/srv/termhub"
//! # data_dir = "/srv/termhub/backend/data"
//! # logs_dir = "/srv/termhub/backend/logs"
//! # database_url = "sqlite:///srv/termhub/terminal_manage.db"
//!
//! [profile]
//! default_command = "bash"
//! default_name = "默认 PowerShell"
//! # default_cwd = "/srv/termhub"
//!
//! [session]
//! backend = "pty"          # or "pipe"
//! grace_timeout_secs = 2
//!
//! [git]
//! diff_delay = 0.35        # seconds between command submission and after-snapshot
//!
//! [logging]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::shell::BackendKind;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind (default `0.0.0.0:8000`).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum concurrent TCP connections (default 256).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// On-disk layout: data directory, log directory, database location.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Deployment root that the other directories hang off (default CWD).
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
    /// Directory for the SQLite database. Default `<base>/backend/data`.
    pub data_dir: Option<PathBuf>,
    /// Directory for per-session log directories. Default `<base>/backend/logs`.
    pub logs_dir: Option<PathBuf>,
    /// Database URL. Default `sqlite://<data_dir>/terminal_manage.db`.
    pub database_url: Option<String>,
}

/// Defaults applied when profiles don't specify overrides, plus the seeded
/// default profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileConfig {
    /// Working directory for profiles without one. Default `<base>`.
    pub default_cwd: Option<PathBuf>,
    /// Command of the seeded default profile (`pwsh` on Windows, `bash` elsewhere).
    #[serde(default = "default_profile_command")]
    pub default_command: String,
    /// Name of the seeded default profile.
    #[serde(default = "default_profile_name")]
    pub default_name: String,
}

/// Session process settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Process back-end: `pty` (default) or `pipe`.
    #[serde(default)]
    pub backend: BackendKind,
    /// Seconds to wait after SIGTERM before SIGKILL (default 2).
    #[serde(default = "default_grace_timeout")]
    pub grace_timeout_secs: u64,
}

/// Git change-tracking settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GitConfig {
    /// Seconds between a submitted command and the after-snapshot (default 0.35).
    #[serde(default = "default_diff_delay")]
    pub diff_delay: f64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}
fn default_max_connections() -> usize {
    256
}
fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_profile_command() -> String {
    if cfg!(windows) { "pwsh" } else { "bash" }.to_string()
}
fn default_profile_name() -> String {
    "默认 PowerShell".to_string()
}
fn default_grace_timeout() -> u64 {
    2
}
fn default_diff_delay() -> f64 {
    0.35
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            data_dir: None,
            logs_dir: None,
            database_url: None,
        }
    }
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            default_cwd: None,
            default_command: default_profile_command(),
            default_name: default_profile_name(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            grace_timeout_secs: default_grace_timeout(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            diff_delay: default_diff_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            profile: ProfileConfig::default(),
            session: SessionConfig::default(),
            git: GitConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise looks
    /// for `termhub.toml` in the current directory, falling back to compiled
    /// defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("termhub.toml").exists() {
            let content =
                std::fs::read_to_string("termhub.toml").expect("Failed to read termhub.toml");
            toml::from_str(&content).expect("Failed to parse termhub.toml")
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(listen) = std::env::var("TERMHUB_LISTEN") {
            config.server.listen = listen;
        }
        if let Ok(base) = std::env::var("TERMHUB_BASE_DIR") {
            config.storage.base_dir = PathBuf::from(base);
        }
        if let Ok(data) = std::env::var("TERMHUB_DATA_DIR") {
            config.storage.data_dir = Some(PathBuf::from(data));
        }
        if let Ok(logs) = std::env::var("TERMHUB_LOGS_DIR") {
            config.storage.logs_dir = Some(PathBuf::from(logs));
        }
        if let Ok(url) = std::env::var("TERMHUB_DATABASE_URL") {
            config.storage.database_url = Some(url);
        }
        if let Ok(cwd) = std::env::var("TERMHUB_DEFAULT_CWD") {
            config.profile.default_cwd = Some(PathBuf::from(cwd));
        }

        config
    }

    /// Directory holding the SQLite database.
    pub fn resolved_data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| self.storage.base_dir.join("backend").join("data"))
    }

    /// Directory holding the per-session log directories.
    pub fn resolved_logs_dir(&self) -> PathBuf {
        self.storage
            .logs_dir
            .clone()
            .unwrap_or_else(|| self.storage.base_dir.join("backend").join("logs"))
    }

    /// Database URL, defaulting to a SQLite file inside the data directory.
    pub fn resolved_database_url(&self) -> String {
        self.storage.database_url.clone().unwrap_or_else(|| {
            format!(
                "sqlite://{}",
                self.resolved_data_dir().join("terminal_manage.db").display()
            )
        })
    }

    /// Working directory for sessions whose profile doesn't set one.
    pub fn resolved_default_cwd(&self) -> PathBuf {
        self.profile
            .default_cwd
            .clone()
            .unwrap_or_else(|| self.storage.base_dir.clone())
    }
}

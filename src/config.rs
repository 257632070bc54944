// ⚙️ Runtime settings
// Defaults, overridden by environment variables. The binaries layer clap
// flags on top of these.

use std::path::PathBuf;

pub const DB_ENV: &str = "BIWEEKLYBUDGET_DB";
pub const BIND_ENV: &str = "BIWEEKLYBUDGET_BIND";
pub const LOG_ENV: &str = "RUST_LOG";

pub const DEFAULT_DB_PATH: &str = "biweeklybudget.db";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// SQLite database file
    pub db_path: PathBuf,

    /// Address the web server listens on
    pub bind_addr: String,

    /// tracing-subscriber filter directive
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Settings {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings::default();

        if let Some(db) = lookup(DB_ENV).filter(|v| !v.is_empty()) {
            settings.db_path = PathBuf::from(db);
        }
        if let Some(bind) = lookup(BIND_ENV).filter(|v| !v.is_empty()) {
            settings.bind_addr = bind;
        }
        if let Some(filter) = lookup(LOG_ENV).filter(|v| !v.is_empty()) {
            settings.log_filter = filter;
        }

        settings
    }
}

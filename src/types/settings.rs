use serde::{Deserialize, Serialize};

/// Store configuration, persisted as JSON by the settings engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacesConfig {
    /// Path of the SQLite file. `None` opens an in-memory store.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Open a second, read-only connection for `concurrent` fetches.
    #[serde(default = "default_true")]
    pub concurrent_reads: bool,
    /// Milliseconds SQLite waits on a locked database before failing.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
    /// `env_logger` filter used by the RPC binary.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_true() -> bool {
    true
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for PlacesConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            concurrent_reads: true,
            busy_timeout_ms: default_busy_timeout(),
            log_filter: default_log_filter(),
        }
    }
}

impl PlacesConfig {
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn on_disk(path: &str) -> Self {
        Self {
            database_path: Some(path.to_string()),
            ..Self::default()
        }
    }
}

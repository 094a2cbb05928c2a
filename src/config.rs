use std::path::{Path, PathBuf};

/// Application-level constants
pub const APP_NAME: &str = "Fabula";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory name created under a project root for Fabula's own data.
pub const PROJECT_DATA_DIR: &str = ".fabula";

/// Database filename inside the project data directory.
pub const DATABASE_FILE: &str = "fabula.db";

/// Queue idle-poll fallback interval (ms). The run loop normally wakes on
/// enqueue; this bounds the latency of time-based retries.
pub const QUEUE_POLL_INTERVAL_MS: u64 = 250;

/// Retry backoff base and cap (ms): `base * 2^attempts`, capped.
pub const BACKOFF_BASE_MS: i64 = 1_000;
pub const BACKOFF_CAP_MS: i64 = 30_000;

/// File-watcher debounce window (ms) coalescing rapid successive edits.
pub const WATCH_DEBOUNCE_MS: u64 = 2_000;

pub fn default_log_filter() -> &'static str {
    "info,fabula=debug"
}

/// Get the application data directory (for global state, not per-project)
/// ~/Fabula/ on all platforms
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join(APP_NAME)
}

/// Database path for a given project root.
pub fn project_db_path(root: &Path) -> PathBuf {
    root.join(PROJECT_DATA_DIR).join(DATABASE_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_data_dir_under_home() {
        let dir = app_data_dir();
        let home = dirs::home_dir().unwrap();
        assert!(dir.starts_with(home));
        assert!(dir.ends_with(APP_NAME));
    }

    #[test]
    fn project_db_path_under_data_dir() {
        let path = project_db_path(Path::new("/tmp/novel"));
        assert_eq!(path, PathBuf::from("/tmp/novel/.fabula/fabula.db"));
    }

    #[test]
    fn backoff_cap_exceeds_base() {
        assert!(BACKOFF_CAP_MS > BACKOFF_BASE_MS);
    }
}

//! Data directory layout.

use std::path::{Path, PathBuf};

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `CHATSYNC_DATA_DIR` environment variable
/// 2. `~/.chatsync`
/// 3. `.chatsync` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("CHATSYNC_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".chatsync");
    }

    PathBuf::from(".chatsync")
}

/// SQLite URL for `file` inside `data_dir`, created on first open.
pub fn database_url(data_dir: &Path, file: &str) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(file).display())
}

/// Create the data directory if needed.
pub async fn ensure_data_dir(data_dir: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(data_dir).await
}

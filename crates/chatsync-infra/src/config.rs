//! Configuration loader for chatsync.
//!
//! Reads `config.toml` from the data directory (`~/.chatsync/` in production)
//! and deserializes it into [`ChatSyncConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::Path;

use chatsync_types::config::ChatSyncConfig;

/// Load configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`ChatSyncConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
/// - If the file exists and parses successfully, returns the parsed config.
pub async fn load_config(data_dir: &Path) -> ChatSyncConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return ChatSyncConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return ChatSyncConfig::default();
        }
    };

    match toml::from_str::<ChatSyncConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            ChatSyncConfig::default()
        }
    }
}

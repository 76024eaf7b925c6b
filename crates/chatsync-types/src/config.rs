//! Configuration types for chatsync.
//!
//! `ChatSyncConfig` represents `{data_dir}/config.toml`. Every field has a
//! default so a partial (or missing) file is valid.

use serde::{Deserialize, Serialize};

use crate::session::{DEFAULT_CHARACTER_ID, LOCAL_USER_ID};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSyncConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub client: ClientConfig,
}

/// Settings for `chatsync serve`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite file for the durable store, relative to the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_database_file() -> String {
    "chatsync.db".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_file: default_database_file(),
        }
    }
}

/// Settings for the local session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of a chatsync server. Without it the store runs offline.
    #[serde(default)]
    pub remote_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_user_id")]
    pub user_id: String,

    #[serde(default = "default_character_id")]
    pub character_id: String,

    /// Appended to the formatting guidance of every fresh system preamble.
    #[serde(default)]
    pub system_prompt: String,

    /// SQLite file for the local cache, relative to the data directory.
    #[serde(default = "default_cache_file")]
    pub cache_file: String,

    /// How many remote chats to list at startup.
    #[serde(default = "default_remote_list_limit")]
    pub remote_list_limit: i64,

    /// How many messages to pull per snapshot hydration.
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: i64,

    /// How many sessions to hydrate at startup.
    #[serde(default = "default_bootstrap_limit")]
    pub bootstrap_limit: usize,
}

fn default_user_id() -> String {
    LOCAL_USER_ID.to_string()
}

fn default_character_id() -> String {
    DEFAULT_CHARACTER_ID.to_string()
}

fn default_cache_file() -> String {
    "sessions.db".to_string()
}

fn default_remote_list_limit() -> i64 {
    200
}

fn default_snapshot_limit() -> i64 {
    500
}

fn default_bootstrap_limit() -> usize {
    3
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            api_key: None,
            user_id: default_user_id(),
            character_id: default_character_id(),
            system_prompt: String::new(),
            cache_file: default_cache_file(),
            remote_list_limit: default_remote_list_limit(),
            snapshot_limit: default_snapshot_limit(),
            bootstrap_limit: default_bootstrap_limit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = ChatSyncConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.client.bootstrap_limit, 3);
        assert_eq!(config.client.user_id, "local");
        assert!(config.client.remote_url.is_none());
    }

    #[test]
    fn test_config_deserialize_empty() {
        let config: ChatSyncConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.client.snapshot_limit, 500);
    }

    #[test]
    fn test_config_deserialize_partial_sections() {
        let toml_str = r#"
[server]
port = 8080

[client]
remote_url = "http://localhost:8080"
character_id = "airi"
"#;
        let config: ChatSyncConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.database_file, "chatsync.db");
        assert_eq!(config.client.remote_url.as_deref(), Some("http://localhost:8080"));
        assert_eq!(config.client.character_id, "airi");
        assert_eq!(config.client.remote_list_limit, 200);
    }
}

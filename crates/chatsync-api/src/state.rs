//! Application state wiring all services together.
//!
//! AppState holds the concrete service instances used by both the CLI and the
//! REST API. Services are generic over the repository trait; AppState pins
//! them to the SQLite implementations.

use std::path::PathBuf;
use std::sync::Arc;

use chatsync_core::chat::query::ChatQueryService;
use chatsync_core::chat::sync::SyncMergeEngine;
use chatsync_core::session::store::{LocalSessionStore, StoreOptions};
use chatsync_infra::config::load_config;
use chatsync_infra::filesystem::{database_url, ensure_data_dir, resolve_data_dir};
use chatsync_infra::remote::http::HttpChatRemote;
use chatsync_infra::sqlite::api_key::SqliteApiKeyStore;
use chatsync_infra::sqlite::chat::SqliteChatRepository;
use chatsync_infra::sqlite::pool::DatabasePool;
use chatsync_infra::sqlite::session_cache::SqliteSessionCache;
use chatsync_types::config::ChatSyncConfig;

pub type ConcreteSyncEngine = SyncMergeEngine<SqliteChatRepository>;
pub type ConcreteQueryService = ChatQueryService<SqliteChatRepository>;
pub type ConcreteSessionStore = LocalSessionStore<SqliteSessionCache, HttpChatRemote>;

/// Shared server state. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub sync_engine: Arc<ConcreteSyncEngine>,
    pub chat_queries: Arc<ConcreteQueryService>,
    pub api_keys: SqliteApiKeyStore,
    pub config: Arc<ChatSyncConfig>,
    pub data_dir: PathBuf,
}

/// Resolved data directory plus its parsed config.
pub struct Environment {
    pub data_dir: PathBuf,
    pub config: ChatSyncConfig,
}

impl Environment {
    pub async fn load() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        ensure_data_dir(&data_dir).await?;
        let config = load_config(&data_dir).await;
        Ok(Self { data_dir, config })
    }
}

impl AppState {
    /// Open the server database and wire services.
    pub async fn init(env: &Environment) -> anyhow::Result<Self> {
        let db_url = database_url(&env.data_dir, &env.config.server.database_file);
        let db_pool = DatabasePool::new(&db_url).await?;
        Ok(Self::from_pool(db_pool, env.config.clone(), env.data_dir.clone()))
    }

    pub fn from_pool(db_pool: DatabasePool, config: ChatSyncConfig, data_dir: PathBuf) -> Self {
        let chat_repo = SqliteChatRepository::new(db_pool.clone());

        Self {
            sync_engine: Arc::new(SyncMergeEngine::new(chat_repo.clone())),
            chat_queries: Arc::new(ChatQueryService::new(chat_repo)),
            api_keys: SqliteApiKeyStore::new(db_pool),
            config: Arc::new(config),
            data_dir,
        }
    }
}

/// Open the on-device session store described by `[client]`.
///
/// The remote is offline unless both `remote_url` and `api_key` are set.
pub async fn open_session_store(env: &Environment) -> anyhow::Result<ConcreteSessionStore> {
    let client = &env.config.client;
    let cache_url = database_url(&env.data_dir, &client.cache_file);
    let cache = SqliteSessionCache::new(DatabasePool::new(&cache_url).await?);
    let remote = HttpChatRemote::from_config(client)?;

    Ok(LocalSessionStore::new(cache, remote, StoreOptions::from(client)))
}

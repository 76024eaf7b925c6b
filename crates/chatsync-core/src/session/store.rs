//! LocalSessionStore: the client's working copy of every chat session.
//!
//! All session maps live in one [`SessionState`] behind a mutex that is never
//! held across an await. Cache writes run on the persist queue, remote pushes
//! on the sync queue; each queue executes strictly in submission order.
//!
//! Reads that must observe earlier writes (loading, syncing, exporting) are
//! themselves queued on the persist queue.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use chatsync_types::chat::{ChatSummary, now_millis};
use chatsync_types::config::ClientConfig;
use chatsync_types::error::{CacheError, RemoteError, SessionStoreError};
use chatsync_types::session::{
    CharacterSessions, ChatHistoryItem, ChatSessionMeta, ChatSessionRecord, ChatSessionsExport,
    ChatSessionsIndex, EXPORT_FORMAT,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::session::bootstrap::select_bootstrap_sessions;
use crate::session::cache::SessionCache;
use crate::session::conflict::{
    MetaResolution, meta_from_remote, messages_from_snapshot, reconcile_meta, should_hydrate,
};
use crate::session::generation::{GenerationMap, GenerationToken};
use crate::session::queue::{TaskHandle, TaskQueue};
use crate::session::record::{build_sync_payload, new_id, normalize_message_ids, system_preamble};
use crate::session::remote::ChatRemote;

const PERSIST_QUEUE: &str = "persist";
const SYNC_QUEUE: &str = "sync";

/// Resolves once a queued cache write has finished.
pub type PersistHandle = TaskHandle<Result<(), SessionStoreError>>;

type LoadFuture = Shared<BoxFuture<'static, Result<(), SessionStoreError>>>;

/// `NotInitialized -> Initializing -> Ready`. A failed initialization returns
/// to `NotInitialized` so it can be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLifecycle {
    NotInitialized,
    Initializing,
    Ready,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub user_id: String,
    pub character_id: String,
    pub system_prompt: String,
    pub remote_list_limit: i64,
    pub snapshot_limit: i64,
    pub bootstrap_limit: usize,
}

impl From<&ClientConfig> for StoreOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            user_id: config.user_id.clone(),
            character_id: config.character_id.clone(),
            system_prompt: config.system_prompt.clone(),
            remote_list_limit: config.remote_list_limit,
            snapshot_limit: config.snapshot_limit,
            bootstrap_limit: config.bootstrap_limit,
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct CreateSessionOptions {
    /// Make the new session the character's active session.
    pub activate: bool,
    /// Initial transcript. Empty means a fresh system preamble.
    pub messages: Vec<ChatHistoryItem>,
    pub title: Option<String>,
}

impl Default for CreateSessionOptions {
    fn default() -> Self {
        Self {
            activate: true,
            messages: Vec::new(),
            title: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForkOptions {
    pub from_session_id: String,
    /// Number of leading messages to copy. Defaults to the whole transcript.
    pub at_index: Option<usize>,
}

struct SessionState {
    user_id: String,
    character_id: String,
    lifecycle: StoreLifecycle,
    active_session_id: Option<String>,
    messages: HashMap<String, Vec<ChatHistoryItem>>,
    metas: HashMap<String, ChatSessionMeta>,
    generations: GenerationMap,
    loaded: HashSet<String>,
    index: Option<ChatSessionsIndex>,
}

impl SessionState {
    fn meta(&self, session_id: &str) -> Option<&ChatSessionMeta> {
        self.metas
            .get(session_id)
            .or_else(|| self.index.as_ref()?.find_meta(session_id))
    }

    /// Drop every session from memory and invalidate all in-flight work.
    fn clear_sessions(&mut self) {
        self.messages.clear();
        self.metas.clear();
        self.generations.bump_all();
        self.loaded.clear();
        self.active_session_id = None;
    }

    /// Working meta follows last-write-wins; the index keeps the newer of
    /// the two.
    fn apply_remote_meta(&mut self, remote: &ChatSummary) {
        let meta = meta_from_remote(remote, &self.user_id);
        if let MetaResolution::TakeRemote(meta) =
            reconcile_meta(self.metas.get(&meta.session_id), meta.clone())
        {
            self.metas.insert(meta.session_id.clone(), meta);
        }
        if let Some(index) = self.index.as_mut() {
            index.upsert_meta(meta);
        }
    }
}

enum Hydration {
    Applied(ChatSessionRecord),
    LocalAhead,
    Stale,
}

struct StoreInner<C, R> {
    cache: C,
    remote: R,
    options: StoreOptions,
    state: Mutex<SessionState>,
    persist_queue: TaskQueue,
    sync_queue: TaskQueue,
    loading: DashMap<String, LoadFuture>,
    initialized: OnceCell<()>,
}

/// Local-first store of chat sessions for one user and character at a time.
///
/// Cloning is cheap and yields a handle to the same store.
pub struct LocalSessionStore<C, R> {
    inner: Arc<StoreInner<C, R>>,
}

impl<C, R> Clone for LocalSessionStore<C, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: SessionCache, R: ChatRemote> LocalSessionStore<C, R> {
    /// Create a store. Must be called within a Tokio runtime.
    pub fn new(cache: C, remote: R, options: StoreOptions) -> Self {
        let state = SessionState {
            user_id: options.user_id.clone(),
            character_id: options.character_id.clone(),
            lifecycle: StoreLifecycle::NotInitialized,
            active_session_id: None,
            messages: HashMap::new(),
            metas: HashMap::new(),
            generations: GenerationMap::default(),
            loaded: HashSet::new(),
            index: None,
        };

        Self {
            inner: Arc::new(StoreInner {
                cache,
                remote,
                options,
                state: Mutex::new(state),
                persist_queue: TaskQueue::new(PERSIST_QUEUE),
                sync_queue: TaskQueue::new(SYNC_QUEUE),
                loading: DashMap::new(),
                initialized: OnceCell::new(),
            }),
        }
    }

    pub fn cache(&self) -> &C {
        &self.inner.cache
    }

    pub fn remote(&self) -> &R {
        &self.inner.remote
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SessionState) -> T) -> T {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    pub fn lifecycle(&self) -> StoreLifecycle {
        self.with_state(|state| state.lifecycle)
    }

    pub fn is_ready(&self) -> bool {
        self.lifecycle() == StoreLifecycle::Ready
    }

    /// Load the index, pull remote sessions (best-effort), and make sure the
    /// current character has an active session.
    ///
    /// Concurrent callers share one in-flight initialization. Once ready,
    /// further calls return immediately.
    pub async fn initialize(&self) -> Result<(), SessionStoreError> {
        self.inner
            .initialized
            .get_or_try_init(|| self.run_initialize())
            .await?;
        Ok(())
    }

    async fn run_initialize(&self) -> Result<(), SessionStoreError> {
        self.with_state(|state| state.lifecycle = StoreLifecycle::Initializing);

        let result = self.initialize_steps().await;

        self.with_state(|state| {
            state.lifecycle = match result {
                Ok(()) => StoreLifecycle::Ready,
                Err(_) => StoreLifecycle::NotInitialized,
            };
        });
        result
    }

    async fn initialize_steps(&self) -> Result<(), SessionStoreError> {
        let user_id = self.user_id();
        self.load_index_for_user(&user_id).await?;

        if self.inner.remote.is_authenticated() {
            if let Err(e) = self.pull_remote_sessions().await {
                warn!(user_id = %user_id, error = %e, "failed to pull remote chat sessions");
            }
        }

        self.ensure_active_session_for_character().await?;
        info!(user_id = %user_id, "session store ready");
        Ok(())
    }

    /// Wait until every queued cache write and remote push has finished.
    pub async fn flush(&self) {
        self.inner.persist_queue.flush().await;
        self.inner.sync_queue.flush().await;
        self.inner.persist_queue.flush().await;
    }

    // -----------------------------------------------------------------------
    // Context
    // -----------------------------------------------------------------------

    pub fn user_id(&self) -> String {
        self.with_state(|state| state.user_id.clone())
    }

    pub fn character_id(&self) -> String {
        self.with_state(|state| state.character_id.clone())
    }

    pub fn active_session_id(&self) -> Option<String> {
        self.with_state(|state| state.active_session_id.clone())
    }

    pub fn index(&self) -> Option<ChatSessionsIndex> {
        self.with_state(|state| state.index.clone())
    }

    pub fn session_meta(&self, session_id: &str) -> Option<ChatSessionMeta> {
        self.with_state(|state| state.meta(session_id).cloned())
    }

    /// Switch user and character. Once ready, the new character gets an
    /// active session; a user change reloads the index first.
    pub async fn set_context(
        &self,
        user_id: impl Into<String>,
        character_id: impl Into<String>,
    ) -> Result<(), SessionStoreError> {
        let user_id = user_id.into();
        let character_id = character_id.into();
        self.with_state(|state| {
            state.user_id = user_id;
            state.character_id = character_id;
        });

        if self.is_ready() {
            self.ensure_active_session_for_character().await?;
        }
        Ok(())
    }

    async fn load_index_for_user(&self, user_id: &str) -> Result<(), SessionStoreError> {
        let cache_user = user_id.to_string();
        let store = self.clone();
        let stored = self
            .queued(async move { store.inner.cache.get_index(&cache_user).await })
            .await?;

        let index = stored.unwrap_or_else(|| ChatSessionsIndex::new(user_id));
        self.with_state(|state| state.index = Some(index));
        Ok(())
    }

    async fn ensure_active_session_for_character(&self) -> Result<(), SessionStoreError> {
        let (user_id, character_id, reload) = self.with_state(|state| {
            let reload = state
                .index
                .as_ref()
                .is_none_or(|index| index.user_id != state.user_id);
            (state.user_id.clone(), state.character_id.clone(), reload)
        });

        if reload {
            self.load_index_for_user(&user_id).await?;
        }

        let active = self.with_state(|state| {
            state
                .index
                .as_ref()
                .and_then(|index| index.character(&character_id))
                .map(|character| character.active_session_id.clone())
                .filter(|id| !id.is_empty())
        });

        match active {
            Some(session_id) => {
                self.with_state(|state| state.active_session_id = Some(session_id.clone()));
                self.load_session(&session_id).await?;
                self.ensure_session(&session_id);
            }
            None => {
                self.create_session(&character_id, CreateSessionOptions::default())
                    .await?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    /// Create a session for `character_id`, persist it with the index, and
    /// schedule a push. Returns the new session id.
    pub async fn create_session(
        &self,
        character_id: &str,
        options: CreateSessionOptions,
    ) -> Result<String, SessionStoreError> {
        let session_id = new_id();
        let now = now_millis();

        let mut messages = options.messages;
        if messages.is_empty() {
            messages.push(system_preamble(&self.inner.options.system_prompt, now));
        }
        normalize_message_ids(&mut messages);

        let record = self.with_state(|state| {
            let meta = ChatSessionMeta {
                session_id: session_id.clone(),
                user_id: state.user_id.clone(),
                character_id: character_id.to_string(),
                title: options.title,
                created_at: now,
                updated_at: now,
                deleted_at: None,
            };

            state.metas.insert(session_id.clone(), meta.clone());
            state.messages.insert(session_id.clone(), messages.clone());
            state.generations.ensure(&session_id);
            state.loaded.insert(session_id.clone());

            let user_id = state.user_id.clone();
            let index = state
                .index
                .get_or_insert_with(|| ChatSessionsIndex::new(user_id));
            let character = index
                .characters
                .entry(character_id.to_string())
                .or_insert_with(|| CharacterSessions {
                    active_session_id: session_id.clone(),
                    sessions: BTreeMap::new(),
                });
            character.sessions.insert(session_id.clone(), meta.clone());
            if options.activate {
                character.active_session_id = session_id.clone();
            }

            ChatSessionRecord { meta, messages }
        });

        self.enqueue_persist(Some(record), true).await??;

        if options.activate {
            self.with_state(|state| state.active_session_id = Some(session_id.clone()));
        }

        debug!(session_id = %session_id, character_id, "created chat session");
        Ok(session_id)
    }

    /// Make `session_id` visible and the current character's active session.
    pub fn set_active_session(&self, session_id: &str) -> PersistHandle {
        self.with_state(|state| state.active_session_id = Some(session_id.to_string()));
        self.ensure_session(session_id);

        let index_changed = self.with_state(|state| {
            let character_id = state.character_id.clone();
            match state
                .index
                .as_mut()
                .and_then(|index| index.character_mut(&character_id))
            {
                Some(character) => {
                    character.active_session_id = session_id.to_string();
                    true
                }
                None => false,
            }
        });

        if self.is_ready() {
            self.spawn_load(session_id);
        }

        if index_changed {
            self.enqueue_persist(None, false)
        } else {
            TaskHandle::ready(PERSIST_QUEUE, Ok(()))
        }
    }

    /// Replace a session's transcript, persist it, and schedule a push.
    pub fn set_session_messages(
        &self,
        session_id: &str,
        messages: Vec<ChatHistoryItem>,
    ) -> PersistHandle {
        self.with_state(|state| {
            state.messages.insert(session_id.to_string(), messages);
        });
        self.persist_session(session_id)
    }

    /// Transcript of the active session; empty when none is active.
    pub fn active_messages(&self) -> Vec<ChatHistoryItem> {
        match self.active_session_id() {
            Some(session_id) => self.session_messages(&session_id),
            None => Vec::new(),
        }
    }

    pub fn set_active_messages(&self, messages: Vec<ChatHistoryItem>) -> PersistHandle {
        match self.active_session_id() {
            Some(session_id) => self.set_session_messages(&session_id, messages),
            None => TaskHandle::ready(PERSIST_QUEUE, Ok(())),
        }
    }

    /// A session's transcript, never empty. Triggers a lazy load once ready.
    pub fn session_messages(&self, session_id: &str) -> Vec<ChatHistoryItem> {
        self.ensure_session(session_id);
        if self.is_ready() {
            self.spawn_load(session_id);
        }
        self.with_state(|state| state.messages.get(session_id).cloned().unwrap_or_default())
    }

    /// Seed a system preamble when the session has no messages.
    ///
    /// The seed is persisted only for sessions already loaded, so an
    /// unloaded cached transcript is never overwritten.
    pub fn ensure_session(&self, session_id: &str) {
        let now = now_millis();
        let persist = self.with_state(|state| {
            state.generations.ensure(session_id);
            let messages = state.messages.entry(session_id.to_string()).or_default();
            if !messages.is_empty() {
                return false;
            }
            messages.push(system_preamble(&self.inner.options.system_prompt, now));
            state.loaded.contains(session_id)
        });

        if persist {
            detach_persist(self.persist_session(session_id));
        }
    }

    /// Persist the working copy of a session: assign missing message ids,
    /// bump `updated_at`, write the meta into the index, save record and
    /// index as one queued unit, then schedule a push.
    pub fn persist_session(&self, session_id: &str) -> PersistHandle {
        let now = now_millis();
        let record = self.with_state(|state| {
            let meta = state.meta(session_id)?.clone();
            let meta = ChatSessionMeta {
                updated_at: now.max(meta.updated_at),
                ..meta
            };

            let messages = state.messages.entry(session_id.to_string()).or_default();
            normalize_message_ids(messages);
            let messages = messages.clone();

            state.metas.insert(session_id.to_string(), meta.clone());
            if let Some(character) = state
                .index
                .as_mut()
                .and_then(|index| index.character_mut(&meta.character_id))
            {
                character.sessions.insert(session_id.to_string(), meta.clone());
            }

            Some(ChatSessionRecord { meta, messages })
        });

        match record {
            Some(record) => self.enqueue_persist(Some(record), true),
            None => {
                debug!(session_id, "no meta for session, skipping persist");
                TaskHandle::ready(PERSIST_QUEUE, Ok(()))
            }
        }
    }

    /// Load a session from the cache into memory, once.
    ///
    /// Concurrent calls for the same id share one in-flight load.
    pub async fn load_session(&self, session_id: &str) -> Result<(), SessionStoreError> {
        if self.with_state(|state| state.loaded.contains(session_id)) {
            return Ok(());
        }

        let load = match self.inner.loading.entry(session_id.to_string()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let store = self.clone();
                let id = session_id.to_string();
                let load = async move { store.load_from_cache(id).await }
                    .boxed()
                    .shared();
                entry.insert(load.clone());
                load
            }
        };

        let result = load.await;
        self.inner.loading.remove(session_id);
        result
    }

    async fn load_from_cache(&self, session_id: String) -> Result<(), SessionStoreError> {
        let token = self.capture_generation(&session_id);
        let stored = self.read_normalized(&session_id).await?;

        let persist_seed = self.with_state(|state| {
            let current = state.generations.is_current(&token);
            state.loaded.insert(session_id.clone());
            match stored {
                Some(record) if current => {
                    state.metas.insert(session_id.clone(), record.meta);
                    state.messages.insert(session_id.clone(), record.messages);
                    false
                }
                Some(_) => false,
                None => state
                    .messages
                    .get(&session_id)
                    .is_some_and(|messages| !messages.is_empty()),
            }
        });

        if persist_seed {
            self.persist_session(&session_id).await??;
        }
        debug!(session_id = %session_id, "loaded chat session");
        Ok(())
    }

    fn spawn_load(&self, session_id: &str) {
        let store = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = store.load_session(&session_id).await {
                warn!(session_id = %session_id, error = %e, "failed to load chat session");
            }
        });
    }

    /// New inactive session holding the first `at_index` messages of another
    /// session. Copied messages get fresh ids.
    pub async fn fork_session(&self, options: ForkOptions) -> Result<String, SessionStoreError> {
        self.load_session(&options.from_session_id).await?;

        let parent = self.session_messages(&options.from_session_id);
        let at = options.at_index.unwrap_or(parent.len()).min(parent.len());
        let messages = parent
            .into_iter()
            .take(at)
            .map(|message| ChatHistoryItem {
                id: Some(new_id()),
                ..message
            })
            .collect();

        let character_id = self.character_id();
        let session_id = self
            .create_session(
                &character_id,
                CreateSessionOptions {
                    activate: false,
                    messages,
                    title: None,
                },
            )
            .await?;

        debug!(
            session_id = %session_id,
            from_session_id = %options.from_session_id,
            at,
            "forked chat session"
        );
        Ok(session_id)
    }

    /// Invalidate in-flight work on a session and reset it to a fresh preamble.
    /// Defaults to the active session.
    pub fn cleanup_messages(&self, session_id: Option<&str>) -> PersistHandle {
        let Some(session_id) = session_id
            .map(str::to_string)
            .or_else(|| self.active_session_id())
        else {
            return TaskHandle::ready(PERSIST_QUEUE, Ok(()));
        };

        self.bump_session_generation(&session_id);
        let preamble = system_preamble(&self.inner.options.system_prompt, now_millis());
        self.set_session_messages(&session_id, vec![preamble])
    }

    /// Delete every cached session of the current user and start over with
    /// one fresh active session.
    pub async fn reset_all_sessions(&self) -> Result<(), SessionStoreError> {
        let (session_ids, character_id) = self.with_state(|state| {
            let session_ids: Vec<String> = match &state.index {
                Some(index) if index.user_id == state.user_id => {
                    index.session_ids().map(str::to_string).collect()
                }
                _ => Vec::new(),
            };
            state.clear_sessions();
            state.index = Some(ChatSessionsIndex::new(state.user_id.clone()));
            (session_ids, state.character_id.clone())
        });
        self.inner.loading.clear();

        let deleted = session_ids.len();
        let store = self.clone();
        self.queued(async move {
            for session_id in &session_ids {
                store.inner.cache.delete_session(session_id).await?;
            }
            Ok::<(), CacheError>(())
        })
        .await?;

        self.create_session(&character_id, CreateSessionOptions::default())
            .await?;
        info!(deleted, "reset all chat sessions");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Generations
    // -----------------------------------------------------------------------

    pub fn session_generation(&self, session_id: &str) -> u64 {
        self.with_state(|state| state.generations.get(session_id))
    }

    pub fn bump_session_generation(&self, session_id: &str) -> u64 {
        self.with_state(|state| state.generations.bump(session_id))
    }

    /// Generation of `session_id`, or of the active session when `None`.
    pub fn session_generation_value(&self, session_id: Option<&str>) -> u64 {
        match session_id.map(str::to_string).or_else(|| self.active_session_id()) {
            Some(session_id) => self.session_generation(&session_id),
            None => 0,
        }
    }

    pub fn capture_generation(&self, session_id: &str) -> GenerationToken {
        self.with_state(|state| state.generations.capture(session_id))
    }

    pub fn is_generation_current(&self, token: &GenerationToken) -> bool {
        self.with_state(|state| state.generations.is_current(token))
    }

    // -----------------------------------------------------------------------
    // Export / import
    // -----------------------------------------------------------------------

    /// Snapshot the index and every indexed session. Sessions missing from
    /// the cache fall back to the in-memory working copy.
    pub async fn export_sessions(&self) -> Result<ChatSessionsExport, SessionStoreError> {
        if !self.is_ready() {
            self.initialize().await?;
        }

        let Some(index) = self.index() else {
            return Ok(ChatSessionsExport {
                format: EXPORT_FORMAT.to_string(),
                index: ChatSessionsIndex::new(self.user_id()),
                sessions: BTreeMap::new(),
            });
        };

        let session_ids: Vec<String> = index.session_ids().map(str::to_string).collect();
        let mut sessions = BTreeMap::new();
        for session_id in session_ids {
            if let Some(record) = self.cached_session(&session_id).await? {
                sessions.insert(session_id, record);
                continue;
            }
            let fallback = self.with_state(|state| {
                let meta = state.metas.get(&session_id)?.clone();
                let messages = state.messages.get(&session_id)?.clone();
                Some(ChatSessionRecord { meta, messages })
            });
            if let Some(record) = fallback {
                sessions.insert(session_id, record);
            }
        }

        Ok(ChatSessionsExport {
            format: EXPORT_FORMAT.to_string(),
            index,
            sessions,
        })
    }

    /// Replace all in-memory and cached state with `payload`.
    ///
    /// Cached sessions of the previous index that the payload does not carry
    /// are deleted. The imported index is rebound to the current user.
    pub async fn import_sessions(
        &self,
        payload: ChatSessionsExport,
    ) -> Result<(), SessionStoreError> {
        if payload.format != EXPORT_FORMAT {
            return Err(SessionStoreError::UnsupportedFormat(payload.format));
        }

        let ChatSessionsExport {
            mut index,
            mut sessions,
            ..
        } = payload;

        let user_id = self.user_id();
        index.user_id = user_id.clone();
        for record in sessions.values_mut() {
            normalize_message_ids(&mut record.messages);
            if index.find_meta(&record.meta.session_id).is_none() {
                index.upsert_meta(record.meta.clone());
            }
        }

        let stale = self.with_state(|state| {
            let previous: Vec<String> = state
                .index
                .as_ref()
                .filter(|previous| previous.user_id == user_id)
                .map(|previous| previous.session_ids().map(str::to_string).collect())
                .unwrap_or_default();

            state.clear_sessions();
            state.index = Some(index.clone());
            for (session_id, record) in &sessions {
                state.metas.insert(session_id.clone(), record.meta.clone());
                state
                    .messages
                    .insert(session_id.clone(), record.messages.clone());
                state.generations.ensure(session_id);
                state.loaded.insert(session_id.clone());
            }

            previous
                .into_iter()
                .filter(|session_id| !sessions.contains_key(session_id))
                .collect::<Vec<_>>()
        });
        self.inner.loading.clear();

        let imported = sessions.len();
        let store = self.clone();
        self.queued(async move {
            for session_id in &stale {
                store.inner.cache.delete_session(session_id).await?;
            }
            store.inner.cache.save_index(&index).await?;
            for (session_id, record) in &sessions {
                store.inner.cache.save_session(session_id, record).await?;
            }
            Ok::<(), CacheError>(())
        })
        .await?;

        self.ensure_active_session_for_character().await?;
        info!(imported, "imported chat sessions");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Remote
    // -----------------------------------------------------------------------

    fn schedule_sync(&self, session_id: String) {
        let store = self.clone();
        let _ = self.inner.sync_queue.enqueue(async move {
            if let Err(e) = store.sync_session_to_remote(&session_id).await {
                warn!(session_id = %session_id, error = %e, "failed to sync chat session");
            }
        });
    }

    /// Push the cached record of a session. Returns `false` when nothing was
    /// pushed (not authenticated, or no cached record).
    pub async fn sync_session_to_remote(&self, session_id: &str) -> Result<bool, SessionStoreError> {
        if !self.inner.remote.is_authenticated() {
            return Ok(false);
        }
        let Some(record) = self.read_normalized(session_id).await? else {
            return Ok(false);
        };

        let payload = build_sync_payload(&record, &self.user_id());
        self.inner.remote.sync_chat(&payload).await?;

        debug!(session_id, messages = payload.messages.len(), "chat session synced");
        Ok(true)
    }

    /// Reconcile remote metas into the index, then hydrate the bootstrap
    /// selection from snapshots.
    pub async fn pull_remote_sessions(&self) -> Result<(), SessionStoreError> {
        if !self.inner.remote.is_authenticated() {
            return Ok(());
        }

        let remote = self
            .inner
            .remote
            .list_chats(self.inner.options.remote_list_limit)
            .await?;
        for chat in &remote {
            self.reconcile_remote_meta(chat);
        }

        let (character_id, active_session_id) =
            self.with_state(|state| (state.character_id.clone(), state.active_session_id.clone()));
        let bootstrap = select_bootstrap_sessions(
            &remote,
            &character_id,
            active_session_id.as_deref(),
            self.inner.options.bootstrap_limit,
        );

        for session_id in &bootstrap {
            self.hydrate_session_from_remote(session_id).await?;
        }

        self.enqueue_persist(None, false).await??;
        info!(
            remote = remote.len(),
            hydrated = bootstrap.len(),
            "pulled remote chat sessions"
        );
        Ok(())
    }

    /// Apply a remote meta: the working meta follows last-write-wins, the
    /// index keeps the newer of the two.
    pub fn reconcile_remote_meta(&self, remote: &ChatSummary) {
        self.with_state(|state| state.apply_remote_meta(remote));
    }

    /// Replace a session's meta and transcript with the remote snapshot,
    /// unless the cached copy is strictly newer or the session's generation
    /// moved while the snapshot was in flight. Returns whether it hydrated.
    pub async fn hydrate_session_from_remote(
        &self,
        session_id: &str,
    ) -> Result<bool, SessionStoreError> {
        let token = self.capture_generation(session_id);

        let snapshot = match self
            .inner
            .remote
            .get_snapshot(session_id, self.inner.options.snapshot_limit)
            .await
        {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return Ok(false),
            Err(RemoteError::Status { status, .. }) => {
                debug!(session_id, status, "remote has no snapshot for session");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let local_updated_at = self
            .cached_session(session_id)
            .await?
            .map(|record| record.meta.updated_at);

        // Meta and transcript are applied together, and only while the
        // captured generation is still current.
        let messages = messages_from_snapshot(&snapshot.messages);
        let outcome = self.with_state(|state| {
            if !state.generations.is_current(&token) {
                return Hydration::Stale;
            }
            state.apply_remote_meta(&snapshot.chat);
            if !should_hydrate(local_updated_at, snapshot.chat.updated_at) {
                return Hydration::LocalAhead;
            }
            let meta = state
                .metas
                .get(session_id)
                .cloned()
                .unwrap_or_else(|| meta_from_remote(&snapshot.chat, &state.user_id));
            state.metas.insert(session_id.to_string(), meta.clone());
            state.messages.insert(session_id.to_string(), messages.clone());
            state.loaded.insert(session_id.to_string());
            Hydration::Applied(ChatSessionRecord { meta, messages })
        });

        let record = match outcome {
            Hydration::Applied(record) => record,
            Hydration::LocalAhead => {
                debug!(session_id, "local session is ahead of remote, skipping hydration");
                return Ok(false);
            }
            Hydration::Stale => {
                debug!(session_id, "session changed during hydration, discarding snapshot");
                return Ok(false);
            }
        };

        self.enqueue_persist(Some(record), false).await??;
        debug!(session_id, "hydrated chat session from remote");
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Queue plumbing
    // -----------------------------------------------------------------------

    /// Save `record` (if any) and the current index as one unit on the
    /// persist queue. The index is snapshotted when the task runs, so it
    /// always includes every mutation made before it.
    fn enqueue_persist(&self, record: Option<ChatSessionRecord>, sync: bool) -> PersistHandle {
        let store = self.clone();
        self.inner.persist_queue.enqueue(async move {
            if let Some(record) = &record {
                store
                    .inner
                    .cache
                    .save_session(&record.meta.session_id, record)
                    .await?;
            }

            let index = store.with_state(|state| state.index.clone());
            if let Some(index) = index {
                store.inner.cache.save_index(&index).await?;
            }

            if sync {
                if let Some(record) = record {
                    store.schedule_sync(record.meta.session_id);
                }
            }
            Ok::<(), SessionStoreError>(())
        })
    }

    /// Run a cache operation on the persist queue and wait for it.
    async fn queued<T, F>(&self, task: F) -> Result<T, SessionStoreError>
    where
        F: Future<Output = Result<T, CacheError>> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.inner.persist_queue.enqueue(task).await??)
    }

    async fn cached_session(
        &self,
        session_id: &str,
    ) -> Result<Option<ChatSessionRecord>, SessionStoreError> {
        let store = self.clone();
        let session_id = session_id.to_string();
        self.queued(async move { store.inner.cache.get_session(&session_id).await })
            .await
    }

    /// Read a cached record, assigning and saving missing message ids in the
    /// same queued unit.
    async fn read_normalized(
        &self,
        session_id: &str,
    ) -> Result<Option<ChatSessionRecord>, SessionStoreError> {
        let store = self.clone();
        let session_id = session_id.to_string();
        self.queued(async move {
            let Some(mut record) = store.inner.cache.get_session(&session_id).await? else {
                return Ok(None);
            };
            if normalize_message_ids(&mut record.messages) {
                store.inner.cache.save_session(&session_id, &record).await?;
            }
            Ok::<_, CacheError>(Some(record))
        })
        .await
    }
}

/// Log the outcome of a persist nobody awaits.
fn detach_persist(handle: PersistHandle) {
    tokio::spawn(async move {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "background persist failed"),
            Err(e) => warn!(error = %e, "background persist dropped"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chatsync_types::chat::{
        ChatMessageView, ChatSnapshot, ChatType, MessageRole, Millis, SyncChatPayload,
        SyncChatResult,
    };
    use chatsync_types::session::{DEFAULT_CHARACTER_ID, MessageContent};

    use crate::session::remote::OfflineRemote;

    // -----------------------------------------------------------------------
    // Doubles
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct MemoryCache {
        sessions: Mutex<HashMap<String, ChatSessionRecord>>,
        indexes: Mutex<HashMap<String, ChatSessionsIndex>>,
        session_reads: AtomicUsize,
        read_delay: Mutex<Option<Duration>>,
        save_delays: Mutex<VecDeque<Duration>>,
    }

    impl MemoryCache {
        fn stored(&self, session_id: &str) -> Option<ChatSessionRecord> {
            self.sessions.lock().unwrap().get(session_id).cloned()
        }

        fn stored_index(&self, user_id: &str) -> Option<ChatSessionsIndex> {
            self.indexes.lock().unwrap().get(user_id).cloned()
        }

        fn insert(&self, record: ChatSessionRecord) {
            self.sessions
                .lock()
                .unwrap()
                .insert(record.meta.session_id.clone(), record);
        }
    }

    impl SessionCache for MemoryCache {
        async fn get_session(
            &self,
            session_id: &str,
        ) -> Result<Option<ChatSessionRecord>, CacheError> {
            self.session_reads.fetch_add(1, Ordering::SeqCst);
            let delay = *self.read_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.stored(session_id))
        }

        async fn save_session(
            &self,
            session_id: &str,
            record: &ChatSessionRecord,
        ) -> Result<(), CacheError> {
            let delay = self.save_delays.lock().unwrap().pop_front();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.sessions
                .lock()
                .unwrap()
                .insert(session_id.to_string(), record.clone());
            Ok(())
        }

        async fn delete_session(&self, session_id: &str) -> Result<(), CacheError> {
            self.sessions.lock().unwrap().remove(session_id);
            Ok(())
        }

        async fn get_index(&self, user_id: &str) -> Result<Option<ChatSessionsIndex>, CacheError> {
            Ok(self.stored_index(user_id))
        }

        async fn save_index(&self, index: &ChatSessionsIndex) -> Result<(), CacheError> {
            self.indexes
                .lock()
                .unwrap()
                .insert(index.user_id.clone(), index.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeRemote {
        chats: Mutex<Vec<ChatSummary>>,
        snapshots: Mutex<HashMap<String, ChatSnapshot>>,
        pushed: Mutex<Vec<SyncChatPayload>>,
        snapshot_delay: Mutex<Option<Duration>>,
        fail_sync: bool,
    }

    impl FakeRemote {
        fn pushed(&self) -> Vec<SyncChatPayload> {
            self.pushed.lock().unwrap().clone()
        }

        fn add_chat(&self, summary: ChatSummary, messages: Vec<ChatMessageView>) {
            self.chats.lock().unwrap().push(summary.clone());
            self.snapshots.lock().unwrap().insert(
                summary.id.clone(),
                ChatSnapshot {
                    chat: summary,
                    messages,
                },
            );
        }
    }

    impl ChatRemote for FakeRemote {
        fn is_authenticated(&self) -> bool {
            true
        }

        async fn list_chats(&self, _limit: i64) -> Result<Vec<ChatSummary>, RemoteError> {
            Ok(self.chats.lock().unwrap().clone())
        }

        async fn get_snapshot(
            &self,
            chat_id: &str,
            _limit: i64,
        ) -> Result<Option<ChatSnapshot>, RemoteError> {
            let delay = *self.snapshot_delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match self.snapshots.lock().unwrap().get(chat_id) {
                Some(snapshot) => Ok(Some(snapshot.clone())),
                None => Err(RemoteError::Status {
                    status: 403,
                    message: "caller is not a member of this chat".to_string(),
                }),
            }
        }

        async fn sync_chat(&self, payload: &SyncChatPayload) -> Result<SyncChatResult, RemoteError> {
            if self.fail_sync {
                return Err(RemoteError::Transport("connection refused".to_string()));
            }
            self.pushed.lock().unwrap().push(payload.clone());
            Ok(SyncChatResult {
                chat_id: payload.chat.id.clone(),
            })
        }
    }

    fn options() -> StoreOptions {
        StoreOptions {
            user_id: "u-1".to_string(),
            character_id: "char-x".to_string(),
            system_prompt: "You are helpful.".to_string(),
            ..StoreOptions::default()
        }
    }

    fn offline_store() -> LocalSessionStore<MemoryCache, OfflineRemote> {
        LocalSessionStore::new(MemoryCache::default(), OfflineRemote, options())
    }

    fn online_store(remote: FakeRemote) -> LocalSessionStore<MemoryCache, FakeRemote> {
        LocalSessionStore::new(MemoryCache::default(), remote, options())
    }

    fn text(role: MessageRole, content: &str) -> ChatHistoryItem {
        ChatHistoryItem::new(new_id(), role, content, now_millis())
    }

    fn summary(id: &str, updated_at: Millis, character_id: Option<&str>) -> ChatSummary {
        ChatSummary {
            id: id.to_string(),
            chat_type: ChatType::Group,
            title: Some(format!("remote {id}")),
            created_at: 1,
            updated_at,
            deleted_at: None,
            character_id: character_id.map(str::to_string),
        }
    }

    fn view(id: &str, content: &str, created_at: Millis) -> ChatMessageView {
        ChatMessageView {
            id: id.to_string(),
            role: MessageRole::Assistant,
            content: content.to_string(),
            created_at,
        }
    }

    fn contents(messages: &[ChatHistoryItem]) -> Vec<String> {
        messages.iter().map(|m| m.content.to_text()).collect()
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_initialize_creates_active_session_with_preamble() {
        let store = offline_store();
        assert_eq!(store.lifecycle(), StoreLifecycle::NotInitialized);

        store.initialize().await.unwrap();
        assert_eq!(store.lifecycle(), StoreLifecycle::Ready);

        let active = store.active_session_id().unwrap();
        let messages = store.active_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.to_text().ends_with("You are helpful."));

        store.flush().await;
        let index = store.cache().stored_index("u-1").unwrap();
        assert_eq!(index.character("char-x").unwrap().active_session_id, active);
        assert!(store.cache().stored(&active).is_some());
    }

    #[tokio::test]
    async fn test_concurrent_initialize_runs_once() {
        let store = offline_store();
        let (a, b) = tokio::join!(store.initialize(), store.initialize());
        a.unwrap();
        b.unwrap();
        store.initialize().await.unwrap();

        let index = store.index().unwrap();
        assert_eq!(index.session_ids().count(), 1);
    }

    #[tokio::test]
    async fn test_initialize_reuses_cached_active_session() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let active = store.active_session_id().unwrap();
        store
            .set_session_messages(&active, vec![text(MessageRole::User, "remember me")])
            .await
            .unwrap()
            .unwrap();
        store.flush().await;

        let cache = MemoryCache::default();
        *cache.sessions.lock().unwrap() = store.cache().sessions.lock().unwrap().clone();
        *cache.indexes.lock().unwrap() = store.cache().indexes.lock().unwrap().clone();

        let reopened = LocalSessionStore::new(cache, OfflineRemote, options());
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.active_session_id().as_deref(), Some(active.as_str()));
        assert_eq!(contents(&reopened.active_messages()), vec!["remember me"]);
    }

    // -----------------------------------------------------------------------
    // Persistence ordering and loading
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_rapid_updates_persist_in_call_order() {
        let store = offline_store();
        store.initialize().await.unwrap();
        store.flush().await;
        let active = store.active_session_id().unwrap();

        // Delay the first of the three saves.
        store
            .cache()
            .save_delays
            .lock()
            .unwrap()
            .push_back(Duration::from_millis(40));

        let first = store.set_session_messages(&active, vec![text(MessageRole::User, "one")]);
        let second = store.set_session_messages(&active, vec![text(MessageRole::User, "two")]);
        let third = store.set_session_messages(&active, vec![text(MessageRole::User, "three")]);
        third.await.unwrap().unwrap();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let stored = store.cache().stored(&active).unwrap();
        assert_eq!(contents(&stored.messages), vec!["three"]);
    }

    #[tokio::test]
    async fn test_persist_assigns_ids_and_bumps_meta() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let active = store.active_session_id().unwrap();
        let before = store.session_meta(&active).unwrap().updated_at;

        let untracked = ChatHistoryItem {
            id: None,
            role: MessageRole::User,
            content: MessageContent::from("no id yet"),
            created_at: None,
        };
        store
            .set_session_messages(&active, vec![untracked])
            .await
            .unwrap()
            .unwrap();

        let working = store.session_messages(&active);
        let stored = store.cache().stored(&active).unwrap();
        assert!(working[0].id.is_some());
        assert_eq!(working[0].id, stored.messages[0].id);
        assert!(stored.meta.updated_at >= before);

        let index = store.index().unwrap();
        assert_eq!(index.find_meta(&active).unwrap(), &stored.meta);
    }

    #[tokio::test]
    async fn test_concurrent_loads_are_coalesced() {
        let store = offline_store();
        store.initialize().await.unwrap();
        store.flush().await;

        let mut record = store.cache().stored(&store.active_session_id().unwrap()).unwrap();
        record.meta.session_id = "cached".to_string();
        record.messages = vec![text(MessageRole::User, "from disk")];
        store.cache().insert(record);

        *store.cache().read_delay.lock().unwrap() = Some(Duration::from_millis(20));
        store.cache().session_reads.store(0, Ordering::SeqCst);

        let (a, b) = tokio::join!(store.load_session("cached"), store.load_session("cached"));
        a.unwrap();
        b.unwrap();
        store.load_session("cached").await.unwrap();

        assert_eq!(store.cache().session_reads.load(Ordering::SeqCst), 1);
        assert_eq!(contents(&store.session_messages("cached")), vec!["from disk"]);
    }

    #[tokio::test]
    async fn test_set_active_session_updates_index_pointer() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let second = store
            .create_session(
                "char-x",
                CreateSessionOptions {
                    activate: false,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_ne!(store.active_session_id().as_deref(), Some(second.as_str()));

        store.set_active_session(&second).await.unwrap().unwrap();
        assert_eq!(store.active_session_id().as_deref(), Some(second.as_str()));

        let stored = store.cache().stored_index("u-1").unwrap();
        assert_eq!(stored.character("char-x").unwrap().active_session_id, second);
    }

    // -----------------------------------------------------------------------
    // Fork, cleanup, reset
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_fork_copies_prefix_with_fresh_ids() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let parent = store.active_session_id().unwrap();
        let messages = vec![
            text(MessageRole::User, "a"),
            text(MessageRole::Assistant, "b"),
            text(MessageRole::User, "c"),
        ];
        store
            .set_session_messages(&parent, messages.clone())
            .await
            .unwrap()
            .unwrap();

        let fork = store
            .fork_session(ForkOptions {
                from_session_id: parent.clone(),
                at_index: Some(2),
            })
            .await
            .unwrap();

        assert_eq!(store.active_session_id().as_deref(), Some(parent.as_str()));
        let forked = store.session_messages(&fork);
        assert_eq!(contents(&forked), vec!["a", "b"]);
        assert_ne!(forked[0].id, messages[0].id);
    }

    #[tokio::test]
    async fn test_cleanup_bumps_generation_and_resets_transcript() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let active = store.active_session_id().unwrap();
        store
            .set_session_messages(&active, vec![text(MessageRole::User, "old")])
            .await
            .unwrap()
            .unwrap();

        let before = store.session_generation_value(None);
        store.cleanup_messages(None).await.unwrap().unwrap();

        assert_eq!(store.session_generation(&active), before + 1);
        let messages = store.session_messages(&active);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::System);
    }

    #[tokio::test]
    async fn test_reset_deletes_cached_sessions() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let old = store.active_session_id().unwrap();
        store.flush().await;
        assert!(store.cache().stored(&old).is_some());

        store.reset_all_sessions().await.unwrap();
        store.flush().await;

        let fresh = store.active_session_id().unwrap();
        assert_ne!(fresh, old);
        assert!(store.cache().stored(&old).is_none());
        let index = store.cache().stored_index("u-1").unwrap();
        assert_eq!(index.session_ids().collect::<Vec<_>>(), vec![fresh.as_str()]);
    }

    #[tokio::test]
    async fn test_set_context_creates_session_for_new_character() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let first = store.active_session_id().unwrap();

        store.set_context("u-1", "char-y").await.unwrap();
        let second = store.active_session_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(store.session_meta(&second).unwrap().character_id, "char-y");

        store.set_context("u-1", "char-x").await.unwrap();
        assert_eq!(store.active_session_id().unwrap(), first);
    }

    // -----------------------------------------------------------------------
    // Export / import
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_export_import_roundtrip_replaces_state() {
        let source = offline_store();
        source.initialize().await.unwrap();
        let session = source.active_session_id().unwrap();
        source
            .set_session_messages(&session, vec![text(MessageRole::User, "portable")])
            .await
            .unwrap()
            .unwrap();
        let exported = source.export_sessions().await.unwrap();
        assert_eq!(exported.format, EXPORT_FORMAT);
        assert!(exported.sessions.contains_key(&session));

        let target = offline_store();
        target.initialize().await.unwrap();
        let replaced = target.active_session_id().unwrap();
        target.flush().await;

        target.import_sessions(exported).await.unwrap();
        target.flush().await;

        assert_eq!(target.active_session_id().as_deref(), Some(session.as_str()));
        assert_eq!(contents(&target.active_messages()), vec!["portable"]);
        assert!(target.cache().stored(&replaced).is_none());
        assert!(target.cache().stored(&session).is_some());
    }

    #[tokio::test]
    async fn test_import_rejects_unknown_format() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let active = store.active_session_id();

        let payload = ChatSessionsExport {
            format: "something-else".to_string(),
            index: ChatSessionsIndex::new("u-1"),
            sessions: BTreeMap::new(),
        };
        let err = store.import_sessions(payload).await.unwrap_err();
        assert!(matches!(err, SessionStoreError::UnsupportedFormat(ref f) if f == "something-else"));
        assert_eq!(store.active_session_id(), active);
    }

    #[tokio::test]
    async fn test_export_initializes_store() {
        let store = offline_store();
        let exported = store.export_sessions().await.unwrap();
        assert!(store.is_ready());
        assert_eq!(exported.sessions.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Remote sync and hydration
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_mutation_pushes_latest_record() {
        let store = online_store(FakeRemote::default());
        store.initialize().await.unwrap();
        let active = store.active_session_id().unwrap();

        store
            .set_session_messages(&active, vec![text(MessageRole::User, "hello")])
            .await
            .unwrap()
            .unwrap();
        store.flush().await;

        let pushed = store.remote().pushed();
        let last = pushed.last().unwrap();
        assert_eq!(last.chat.id, active);
        assert_eq!(last.messages.len(), 1);
        assert_eq!(last.messages[0].content, "hello");
        assert_eq!(last.members.len(), 2);
    }

    #[tokio::test]
    async fn test_offline_store_never_pushes() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let active = store.active_session_id().unwrap();
        assert!(!store.sync_session_to_remote(&active).await.unwrap());
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_local_state() {
        let remote = FakeRemote {
            fail_sync: true,
            ..Default::default()
        };
        let store = online_store(remote);
        store.initialize().await.unwrap();
        let active = store.active_session_id().unwrap();

        store
            .set_session_messages(&active, vec![text(MessageRole::User, "kept")])
            .await
            .unwrap()
            .unwrap();
        store.flush().await;

        assert!(store.remote().pushed().is_empty());
        assert_eq!(contents(&store.session_messages(&active)), vec!["kept"]);
        let stored = store.cache().stored(&active).unwrap();
        assert_eq!(contents(&stored.messages), vec!["kept"]);
    }

    #[tokio::test]
    async fn test_initialize_pulls_and_hydrates_character_session() {
        let remote = FakeRemote::default();
        remote.add_chat(
            summary("remote-x", 300, Some("char-x")),
            vec![view("m-1", "first", 100), view("m-2", "second", 200)],
        );
        remote.add_chat(summary("remote-y", 500, Some("char-y")), vec![view("m-3", "other", 150)]);

        let store = online_store(remote);
        store.initialize().await.unwrap();

        assert_eq!(store.active_session_id().as_deref(), Some("remote-x"));
        assert_eq!(contents(&store.active_messages()), vec!["first", "second"]);

        store.flush().await;
        assert!(store.cache().stored("remote-y").is_some());
        let index = store.cache().stored_index("u-1").unwrap();
        assert_eq!(index.character("char-y").unwrap().active_session_id, "remote-y");
    }

    #[tokio::test]
    async fn test_remote_meta_reconciliation_is_monotonic() {
        let store = offline_store();
        store.initialize().await.unwrap();
        let active = store.active_session_id().unwrap();
        let local = store.session_meta(&active).unwrap();

        let mut older = summary(&active, local.updated_at - 100, Some("char-x"));
        older.title = Some("stale".to_string());
        store.reconcile_remote_meta(&older);
        assert_eq!(store.session_meta(&active).unwrap(), local);

        let mut newer = summary(&active, local.updated_at + 100, Some("char-x"));
        newer.title = Some("fresh".to_string());
        store.reconcile_remote_meta(&newer);
        let replaced = store.session_meta(&active).unwrap();
        assert_eq!(replaced.title.as_deref(), Some("fresh"));
        assert_eq!(replaced.updated_at, local.updated_at + 100);
    }

    #[tokio::test]
    async fn test_hydration_skipped_when_local_is_ahead() {
        let remote = FakeRemote::default();
        let store = online_store(remote);
        store.initialize().await.unwrap();
        let active = store.active_session_id().unwrap();
        store
            .set_session_messages(&active, vec![text(MessageRole::User, "local edit")])
            .await
            .unwrap()
            .unwrap();

        store
            .remote()
            .add_chat(summary(&active, 10, Some("char-x")), vec![view("m-1", "server", 5)]);

        assert!(!store.hydrate_session_from_remote(&active).await.unwrap());
        assert_eq!(contents(&store.session_messages(&active)), vec!["local edit"]);
    }

    #[tokio::test]
    async fn test_stale_hydration_is_discarded() {
        let remote = FakeRemote::default();
        *remote.snapshot_delay.lock().unwrap() = Some(Duration::from_millis(30));
        let store = online_store(remote);
        store.initialize().await.unwrap();

        store.remote().add_chat(
            summary("late", now_millis() + 10_000, None),
            vec![view("m-1", "late reply", 1)],
        );

        let bump = async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            store.bump_session_generation("late");
        };
        let (hydrated, _) = tokio::join!(store.hydrate_session_from_remote("late"), bump);

        assert!(!hydrated.unwrap());
        assert!(store.cache().stored("late").is_none());
        assert!(store.session_meta("late").is_none());
        let index = store.index().unwrap();
        assert!(index.find_meta("late").is_none());
        assert!(
            index
                .character(DEFAULT_CHARACTER_ID)
                .is_none_or(|character| character.active_session_id != "late")
        );
    }

    #[tokio::test]
    async fn test_hydration_of_unknown_remote_session_is_quiet() {
        let store = online_store(FakeRemote::default());
        store.initialize().await.unwrap();
        assert!(!store.hydrate_session_from_remote("missing").await.unwrap());
    }
}

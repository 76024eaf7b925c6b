//! Remote chat API port used by the local session store.

use std::future::Future;

use chatsync_types::chat::{ChatSnapshot, ChatSummary, SyncChatPayload, SyncChatResult};
use chatsync_types::error::{ChatError, RemoteError};
use chatsync_types::query::{ChatListOptions, MessagePageOptions};

use crate::chat::query::ChatQueryService;
use crate::chat::repository::ChatRepository;
use crate::chat::sync::SyncMergeEngine;

/// The server's list, snapshot, and sync endpoints as seen by one client.
///
/// Implementations: `HttpChatRemote` in chatsync-infra, [`OfflineRemote`],
/// and [`EmbeddedRemote`] for running against an in-process store.
pub trait ChatRemote: Send + Sync + 'static {
    /// Whether remote calls should be attempted at all.
    fn is_authenticated(&self) -> bool;

    /// Most recently updated live chats, newest first.
    fn list_chats(
        &self,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<ChatSummary>, RemoteError>> + Send;

    /// `Ok(None)` when the chat is absent or tombstoned.
    fn get_snapshot(
        &self,
        chat_id: &str,
        limit: i64,
    ) -> impl Future<Output = Result<Option<ChatSnapshot>, RemoteError>> + Send;

    fn sync_chat(
        &self,
        payload: &SyncChatPayload,
    ) -> impl Future<Output = Result<SyncChatResult, RemoteError>> + Send;
}

/// Remote used when no server is configured. Never authenticated.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineRemote;

impl ChatRemote for OfflineRemote {
    fn is_authenticated(&self) -> bool {
        false
    }

    async fn list_chats(&self, _limit: i64) -> Result<Vec<ChatSummary>, RemoteError> {
        Err(RemoteError::NotAuthenticated)
    }

    async fn get_snapshot(
        &self,
        _chat_id: &str,
        _limit: i64,
    ) -> Result<Option<ChatSnapshot>, RemoteError> {
        Err(RemoteError::NotAuthenticated)
    }

    async fn sync_chat(&self, _payload: &SyncChatPayload) -> Result<SyncChatResult, RemoteError> {
        Err(RemoteError::NotAuthenticated)
    }
}

/// Remote that calls the merge engine and query service directly, acting as
/// a fixed user. Errors carry the status code the HTTP surface would return.
pub struct EmbeddedRemote<R: ChatRepository> {
    user_id: String,
    engine: SyncMergeEngine<R>,
    queries: ChatQueryService<R>,
}

impl<R: ChatRepository> EmbeddedRemote<R> {
    pub fn new(
        user_id: impl Into<String>,
        engine: SyncMergeEngine<R>,
        queries: ChatQueryService<R>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            engine,
            queries,
        }
    }
}

impl<R: ChatRepository + 'static> ChatRemote for EmbeddedRemote<R> {
    fn is_authenticated(&self) -> bool {
        true
    }

    async fn list_chats(&self, limit: i64) -> Result<Vec<ChatSummary>, RemoteError> {
        let options = ChatListOptions {
            limit: Some(limit),
            before_updated_at: None,
        };
        self.queries
            .list_chats(&self.user_id, &options)
            .await
            .map_err(remote_status)
    }

    async fn get_snapshot(
        &self,
        chat_id: &str,
        limit: i64,
    ) -> Result<Option<ChatSnapshot>, RemoteError> {
        let options = MessagePageOptions {
            limit: Some(limit),
            before_created_at: None,
        };
        self.queries
            .get_chat_snapshot(&self.user_id, chat_id, &options)
            .await
            .map_err(remote_status)
    }

    async fn sync_chat(&self, payload: &SyncChatPayload) -> Result<SyncChatResult, RemoteError> {
        self.engine
            .sync_chat(&self.user_id, payload)
            .await
            .map_err(remote_status)
    }
}

/// Status code the HTTP boundary assigns to a chat error.
pub fn status_for(error: &ChatError) -> u16 {
    match error {
        ChatError::Validation(_) => 400,
        ChatError::Forbidden => 403,
        ChatError::NotFound => 404,
        ChatError::Conflict(_) => 409,
        ChatError::Storage(_) => 500,
    }
}

fn remote_status(error: ChatError) -> RemoteError {
    RemoteError::Status {
        status: status_for(&error),
        message: error.to_string(),
    }
}

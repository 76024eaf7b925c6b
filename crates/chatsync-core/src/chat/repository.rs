//! ChatRepository and ChatTransaction trait definitions.
//!
//! The durable store is split into a read surface (`ChatRepository`) used by
//! the query service and a transactional write surface (`ChatTransaction`)
//! used by the sync merge engine. Everything done through one transaction
//! becomes visible atomically on `commit`; dropping it rolls back.

use std::future::Future;

use chatsync_types::chat::{Chat, ChatMember, Message, Millis};
use chatsync_types::error::RepositoryError;

/// Repository trait for chats, members, and messages.
///
/// Implementations live in chatsync-infra (e.g., `SqliteChatRepository`).
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ChatRepository: Send + Sync {
    type Tx: ChatTransaction;

    /// Open a write transaction.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, RepositoryError>> + Send;

    /// Whether `user_id` holds a `user` membership on `chat_id`.
    fn is_user_member(
        &self,
        chat_id: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    /// Get a chat by id, tombstoned or not.
    fn get_chat(
        &self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Option<Chat>, RepositoryError>> + Send;

    /// Non-tombstoned chats the user is a member of, `updated_at` DESC,
    /// optionally strictly older than `before_updated_at`.
    fn list_member_chats(
        &self,
        user_id: &str,
        limit: i64,
        before_updated_at: Option<Millis>,
    ) -> impl Future<Output = Result<Vec<Chat>, RepositoryError>> + Send;

    /// Chats the user is a member of whose `updated_at` or `deleted_at` is
    /// strictly after `since`, tombstones included, `updated_at` ASC.
    fn list_member_chats_changed_since(
        &self,
        user_id: &str,
        since: Millis,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Chat>, RepositoryError>> + Send;

    /// Members of the given chats in insertion order.
    fn list_members(
        &self,
        chat_ids: &[String],
    ) -> impl Future<Output = Result<Vec<ChatMember>, RepositoryError>> + Send;

    /// Non-tombstoned messages of a chat, `created_at` DESC, capped at
    /// `limit`, optionally strictly older than `before_created_at`.
    fn list_messages_newest_first(
        &self,
        chat_id: &str,
        limit: i64,
        before_created_at: Option<Millis>,
    ) -> impl Future<Output = Result<Vec<Message>, RepositoryError>> + Send;

    /// Tombstone a chat: sets `deleted_at` and raises `updated_at` to it.
    ///
    /// Returns `RepositoryError::NotFound` if the chat does not exist.
    fn soft_delete_chat(
        &self,
        chat_id: &str,
        deleted_at: Millis,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

/// One atomic unit of work against the durable store.
pub trait ChatTransaction: Send {
    fn find_chat(
        &mut self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Option<Chat>, RepositoryError>> + Send;

    fn is_user_member(
        &mut self,
        chat_id: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<bool, RepositoryError>> + Send;

    fn insert_chat(&mut self, chat: &Chat)
    -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite type, title, and `updated_at` of an existing chat.
    fn update_chat(&mut self, chat: &Chat)
    -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Members of one chat in insertion order.
    fn list_members(
        &mut self,
        chat_id: &str,
    ) -> impl Future<Output = Result<Vec<ChatMember>, RepositoryError>> + Send;

    fn insert_member(
        &mut self,
        member: &ChatMember,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn find_message(
        &mut self,
        message_id: &str,
    ) -> impl Future<Output = Result<Option<Message>, RepositoryError>> + Send;

    fn insert_message(
        &mut self,
        message: &Message,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    /// Overwrite sender, role, content, and `updated_at`. `created_at` is never written.
    fn update_message(
        &mut self,
        message: &Message,
    ) -> impl Future<Output = Result<(), RepositoryError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), RepositoryError>> + Send;
}

//! Last-write-wins reconciliation between local and remote session state.
//!
//! - Remote meta replaces local meta only when `remote.updated_at >= local.updated_at`.
//! - Snapshot hydration is skipped when local is strictly ahead; such local
//!   state is presumed not pushed yet.
//! - Hydration replaces the whole message list; messages are never merged one by one.

use chatsync_types::chat::{ChatMessageView, ChatSummary, Millis};
use chatsync_types::session::{ChatHistoryItem, ChatSessionMeta, DEFAULT_CHARACTER_ID};

/// Outcome of reconciling one remote meta against the local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaResolution {
    KeepLocal,
    TakeRemote(ChatSessionMeta),
}

/// Project a remote chat into a local meta owned by `user_id`.
///
/// Chats without a character member land under the `default` character.
pub fn meta_from_remote(remote: &ChatSummary, user_id: &str) -> ChatSessionMeta {
    ChatSessionMeta {
        session_id: remote.id.clone(),
        user_id: user_id.to_string(),
        character_id: remote
            .character_id
            .clone()
            .unwrap_or_else(|| DEFAULT_CHARACTER_ID.to_string()),
        title: remote.title.clone(),
        created_at: remote.created_at,
        updated_at: remote.updated_at,
        deleted_at: None,
    }
}

pub fn remote_wins(local: Option<&ChatSessionMeta>, remote: &ChatSessionMeta) -> bool {
    local.is_none_or(|local| local.updated_at <= remote.updated_at)
}

pub fn reconcile_meta(local: Option<&ChatSessionMeta>, remote: ChatSessionMeta) -> MetaResolution {
    if remote_wins(local, &remote) {
        MetaResolution::TakeRemote(remote)
    } else {
        MetaResolution::KeepLocal
    }
}

/// Whether a remote snapshot may replace the cached session.
pub fn should_hydrate(local_updated_at: Option<Millis>, remote_updated_at: Millis) -> bool {
    local_updated_at.is_none_or(|local| local <= remote_updated_at)
}

/// Convert a snapshot's message page into local chat items, preserving order.
pub fn messages_from_snapshot(messages: &[ChatMessageView]) -> Vec<ChatHistoryItem> {
    messages
        .iter()
        .map(|message| {
            ChatHistoryItem::new(
                message.id.clone(),
                message.role,
                message.content.clone(),
                message.created_at,
            )
        })
        .collect()
}

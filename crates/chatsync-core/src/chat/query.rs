//! Read paths over the durable store: list, delta, snapshot, message pages,
//! and soft delete.

use std::collections::HashMap;

use chatsync_types::chat::{
    Chat, ChatDelta, ChatMember, ChatMessageView, ChatSnapshot, ChatSummary, DeletedChat,
    MemberType, now_millis,
};
use chatsync_types::error::ChatError;
use chatsync_types::query::{ChatDeltaOptions, ChatListOptions, MessagePageOptions};
use tracing::info;

use crate::chat::repository::ChatRepository;

/// Membership-checked queries on behalf of one caller.
pub struct ChatQueryService<R: ChatRepository> {
    repo: R,
}

impl<R: ChatRepository> ChatQueryService<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Live chats the caller belongs to, most recently updated first.
    pub async fn list_chats(
        &self,
        user_id: &str,
        options: &ChatListOptions,
    ) -> Result<Vec<ChatSummary>, ChatError> {
        options.validate()?;
        let chats = self
            .repo
            .list_member_chats(user_id, options.effective_limit(), options.before_updated_at)
            .await?;
        self.summarize(chats).await
    }

    /// Chats changed or tombstoned strictly after `since_updated_at`.
    ///
    /// `chats` includes tombstoned entries; `deleted_chat_ids` lists those
    /// whose deletion itself happened after the watermark.
    pub async fn list_chat_delta(
        &self,
        user_id: &str,
        options: &ChatDeltaOptions,
    ) -> Result<ChatDelta, ChatError> {
        options.validate()?;
        let since = options.since();
        let chats = self
            .repo
            .list_member_chats_changed_since(user_id, since, options.effective_limit())
            .await?;

        let deleted_chat_ids = chats
            .iter()
            .filter(|chat| chat.deleted_at.is_some_and(|deleted_at| deleted_at > since))
            .map(|chat| chat.id.clone())
            .collect();

        Ok(ChatDelta {
            chats: self.summarize(chats).await?,
            deleted_chat_ids,
        })
    }

    /// Chat meta plus one page of messages.
    ///
    /// `Forbidden` without membership, whether or not the chat exists.
    /// `Ok(None)` when the chat is absent or tombstoned.
    pub async fn get_chat_snapshot(
        &self,
        user_id: &str,
        chat_id: &str,
        options: &MessagePageOptions,
    ) -> Result<Option<ChatSnapshot>, ChatError> {
        options.validate()?;
        self.require_member(chat_id, user_id).await?;

        let Some(chat) = self.repo.get_chat(chat_id).await? else {
            return Ok(None);
        };
        if chat.is_tombstoned() {
            return Ok(None);
        }

        let messages = self.message_page(chat_id, options).await?;
        let mut summaries = self.summarize(vec![chat]).await?;
        let Some(chat) = summaries.pop() else {
            return Ok(None);
        };

        Ok(Some(ChatSnapshot { chat, messages }))
    }

    /// One page of messages, oldest first.
    ///
    /// The next page is requested with `before_created_at` set to the
    /// `created_at` of the first (oldest) item of this page.
    pub async fn list_chat_messages(
        &self,
        user_id: &str,
        chat_id: &str,
        options: &MessagePageOptions,
    ) -> Result<Vec<ChatMessageView>, ChatError> {
        options.validate()?;
        self.require_member(chat_id, user_id).await?;
        self.message_page(chat_id, options).await
    }

    /// Tombstone a chat. The chat stays enumerable through the delta query.
    pub async fn soft_delete_chat(
        &self,
        user_id: &str,
        chat_id: &str,
    ) -> Result<DeletedChat, ChatError> {
        self.require_member(chat_id, user_id).await?;

        let deleted_at = now_millis();
        self.repo.soft_delete_chat(chat_id, deleted_at).await?;
        info!(chat_id, user_id, deleted_at, "chat soft-deleted");

        Ok(DeletedChat {
            chat_id: chat_id.to_string(),
            deleted_at,
        })
    }

    async fn require_member(&self, chat_id: &str, user_id: &str) -> Result<(), ChatError> {
        if self.repo.is_user_member(chat_id, user_id).await? {
            Ok(())
        } else {
            Err(ChatError::Forbidden)
        }
    }

    async fn message_page(
        &self,
        chat_id: &str,
        options: &MessagePageOptions,
    ) -> Result<Vec<ChatMessageView>, ChatError> {
        let mut messages = self
            .repo
            .list_messages_newest_first(
                chat_id,
                options.effective_limit(),
                options.before_created_at,
            )
            .await?;
        messages.reverse();
        Ok(messages.into_iter().map(ChatMessageView::from).collect())
    }

    async fn summarize(&self, chats: Vec<Chat>) -> Result<Vec<ChatSummary>, ChatError> {
        if chats.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<String> = chats.iter().map(|chat| chat.id.clone()).collect();
        let members = self.repo.list_members(&ids).await?;
        let characters = first_character_by_chat(&members);

        Ok(chats
            .into_iter()
            .map(|chat| {
                let character_id = characters.get(chat.id.as_str()).map(|id| id.to_string());
                ChatSummary::from_chat(chat, character_id)
            })
            .collect())
    }
}

/// Map chat id to its first `character` member, in insertion order.
fn first_character_by_chat(members: &[ChatMember]) -> HashMap<&str, &str> {
    let mut characters = HashMap::new();
    for member in members {
        if member.member_type != MemberType::Character {
            continue;
        }
        if let Some(character_id) = member.character_id.as_deref() {
            characters.entry(member.chat_id.as_str()).or_insert(character_id);
        }
    }
    characters
}

//! Sync merge engine: applies an inbound sync payload to the durable store.
//!
//! One call runs in one transaction. The merge is idempotent: replaying the
//! same payload only moves `updated_at` fields, never duplicates members or
//! messages. Members are additive-only; messages are upserted by id.

use chatsync_types::chat::{
    Chat, ChatMember, MemberType, Message, MessageRole, Millis, SyncChatFields, SyncChatPayload,
    SyncChatResult, SyncMemberPayload, now_millis,
};
use chatsync_types::error::ChatError;
use tracing::{debug, info};

use crate::chat::repository::{ChatRepository, ChatTransaction};

/// Merges client sync payloads into the durable store.
///
/// Generic over `ChatRepository` so chatsync-core never depends on chatsync-infra.
pub struct SyncMergeEngine<R: ChatRepository> {
    repo: R,
}

impl<R: ChatRepository> SyncMergeEngine<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn repo(&self) -> &R {
        &self.repo
    }

    /// Merge `payload` on behalf of `user_id`.
    ///
    /// - Existing chat without a `user` membership for the caller: `Forbidden`.
    /// - Message id already bound to a different chat: `Conflict`; nothing is written.
    pub async fn sync_chat(
        &self,
        user_id: &str,
        payload: &SyncChatPayload,
    ) -> Result<SyncChatResult, ChatError> {
        validate_payload(payload)?;

        let now = now_millis();
        let chat_id = payload.chat.id.as_str();
        let mut tx = self.repo.begin().await?;

        match tx.find_chat(chat_id).await? {
            Some(existing) => {
                if !tx.is_user_member(chat_id, user_id).await? {
                    return Err(ChatError::Forbidden);
                }
                let updated = apply_chat_update(existing, &payload.chat, now);
                tx.update_chat(&updated).await?;
            }
            None => {
                tx.insert_chat(&new_chat(&payload.chat, now)).await?;
                debug!(chat_id, "created chat from sync payload");
            }
        }

        let mut members = tx.list_members(chat_id).await?;
        for desired in desired_members(user_id, &payload.members) {
            if members.iter().any(|m| same_identity(m, &desired)) {
                continue;
            }
            let member = ChatMember {
                chat_id: chat_id.to_string(),
                member_type: desired.member_type,
                user_id: desired.user_id.clone().filter(|_| desired.member_type == MemberType::User),
                character_id: desired
                    .character_id
                    .clone()
                    .filter(|_| desired.member_type != MemberType::User),
            };
            tx.insert_member(&member).await?;
            members.push(member);
        }

        let character_id = sender_character_id(&payload.members, &members);

        for incoming in &payload.messages {
            let sender_id = resolve_sender_id(incoming.role, user_id, character_id.as_deref());

            match tx.find_message(&incoming.id).await? {
                Some(existing) if existing.chat_id != chat_id => {
                    return Err(ChatError::Conflict(format!(
                        "message '{}' already belongs to another chat",
                        incoming.id
                    )));
                }
                Some(existing) => {
                    let updated = Message {
                        sender_id,
                        role: incoming.role,
                        content: incoming.content.clone(),
                        updated_at: now.max(existing.updated_at),
                        ..existing
                    };
                    tx.update_message(&updated).await?;
                }
                None => {
                    let message = Message {
                        id: incoming.id.clone(),
                        chat_id: chat_id.to_string(),
                        sender_id,
                        role: incoming.role,
                        content: incoming.content.clone(),
                        created_at: incoming.created_at.unwrap_or(now),
                        updated_at: now,
                        deleted_at: None,
                    };
                    tx.insert_message(&message).await?;
                }
            }
        }

        tx.commit().await?;

        info!(
            chat_id,
            user_id,
            messages = payload.messages.len(),
            "chat synced"
        );

        Ok(SyncChatResult {
            chat_id: chat_id.to_string(),
        })
    }
}

fn validate_payload(payload: &SyncChatPayload) -> Result<(), ChatError> {
    if payload.chat.id.trim().is_empty() {
        return Err(ChatError::Validation("chat.id must not be empty".to_string()));
    }
    if let Some(message) = payload.messages.iter().find(|m| m.id.trim().is_empty()) {
        return Err(ChatError::Validation(format!(
            "message id must not be empty (role {})",
            message.role
        )));
    }
    Ok(())
}

fn new_chat(fields: &SyncChatFields, now: Millis) -> Chat {
    Chat {
        id: fields.id.clone(),
        chat_type: fields.chat_type.unwrap_or_default(),
        title: fields.title.clone(),
        created_at: fields.created_at.unwrap_or(now),
        updated_at: fields.updated_at.unwrap_or(now),
        deleted_at: None,
    }
}

/// Partial update: only supplied fields change; `updated_at` never moves backwards.
fn apply_chat_update(existing: Chat, fields: &SyncChatFields, now: Millis) -> Chat {
    let updated_at = fields.updated_at.unwrap_or(now).max(existing.updated_at);
    Chat {
        chat_type: fields.chat_type.unwrap_or(existing.chat_type),
        title: fields.title.clone().or(existing.title),
        updated_at,
        ..existing
    }
}

/// The caller as a `user` member, plus every non-`user` member of the payload
/// that carries an id.
fn desired_members(user_id: &str, members: &[SyncMemberPayload]) -> Vec<SyncMemberPayload> {
    std::iter::once(SyncMemberPayload::user(user_id))
        .chain(
            members
                .iter()
                .filter(|m| m.member_type != MemberType::User)
                .cloned(),
        )
        .filter(|m| m.subject_id().is_some())
        .collect()
}

fn same_identity(stored: &ChatMember, desired: &SyncMemberPayload) -> bool {
    stored.member_type == desired.member_type && stored.subject_id() == desired.subject_id()
}

/// First `character` member of the payload, falling back to the chat's stored
/// character member.
fn sender_character_id(payload: &[SyncMemberPayload], stored: &[ChatMember]) -> Option<String> {
    payload
        .iter()
        .filter(|m| m.member_type == MemberType::Character)
        .find_map(|m| m.subject_id().map(str::to_string))
        .or_else(|| {
            stored
                .iter()
                .filter(|m| m.member_type == MemberType::Character)
                .find_map(|m| m.subject_id().map(str::to_string))
        })
}

/// `user` messages are sent by the caller; anything else by the character
/// member, or by the literal role name when the chat has none.
fn resolve_sender_id(role: MessageRole, user_id: &str, character_id: Option<&str>) -> String {
    match (role, character_id) {
        (MessageRole::User, _) => user_id.to_string(),
        (_, Some(character_id)) => character_id.to_string(),
        (role, None) => role.as_str().to_string(),
    }
}

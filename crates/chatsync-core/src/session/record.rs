//! Helpers over local session records: id normalization, the system
//! preamble, and the outbound sync payload.

use chatsync_types::chat::{
    ChatType, MessageRole, Millis, SyncChatFields, SyncChatPayload, SyncMemberPayload,
    SyncMessagePayload,
};
use chatsync_types::session::{ChatHistoryItem, ChatSessionRecord, DEFAULT_CHARACTER_ID};
use uuid::Uuid;

const FORMATTING_GUIDANCE: &str = concat!(
    "- For any programming code block, always specify the programming language, eg. ```python ... ```\n",
    "- For any math equation, use LaTeX format, eg: $ x^3 $, always escape dollar sign outside math equation\n",
);

pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// A fresh `system` item: formatting guidance followed by `system_prompt`.
pub fn system_preamble(system_prompt: &str, now: Millis) -> ChatHistoryItem {
    ChatHistoryItem::new(
        new_id(),
        MessageRole::System,
        format!("{FORMATTING_GUIDANCE}{system_prompt}"),
        now,
    )
}

/// Assign a fresh id to every item lacking one. Returns whether anything changed.
pub fn normalize_message_ids(messages: &mut [ChatHistoryItem]) -> bool {
    let mut changed = false;
    for message in messages.iter_mut().filter(|m| m.id.is_none()) {
        message.id = Some(new_id());
        changed = true;
    }
    changed
}

/// Outbound payload for one cached record.
///
/// The chat is pushed as a `group`; the character is added as a member
/// unless it is the `default` placeholder. Content is flattened to text.
pub fn build_sync_payload(record: &ChatSessionRecord, user_id: &str) -> SyncChatPayload {
    let meta = &record.meta;

    let mut members = vec![SyncMemberPayload::user(user_id)];
    if !meta.character_id.is_empty() && meta.character_id != DEFAULT_CHARACTER_ID {
        members.push(SyncMemberPayload::character(meta.character_id.clone()));
    }

    let messages = record
        .messages
        .iter()
        .map(|message| SyncMessagePayload {
            id: message.id.clone().unwrap_or_else(new_id),
            role: message.role,
            content: message.content.to_text(),
            created_at: message.created_at,
        })
        .collect();

    SyncChatPayload {
        chat: SyncChatFields {
            id: meta.session_id.clone(),
            chat_type: Some(ChatType::Group),
            title: meta.title.clone(),
            created_at: Some(meta.created_at),
            updated_at: Some(meta.updated_at),
        },
        members,
        messages,
    }
}

//! Chat, member, and message types for the durable server-side record,
//! plus the wire shapes exchanged by the sync and read endpoints.
//!
//! All timestamps are epoch milliseconds ([`Millis`]). Wire shapes use
//! camelCase field names.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

/// Epoch timestamp in milliseconds.
pub type Millis = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> Millis {
    Utc::now().timestamp_millis()
}

/// Kind of chat.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (chat_type IN ('private', 'bot', 'group', 'channel'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Private,
    Bot,
    #[default]
    Group,
    Channel,
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatType::Private => write!(f, "private"),
            ChatType::Bot => write!(f, "bot"),
            ChatType::Group => write!(f, "group"),
            ChatType::Channel => write!(f, "channel"),
        }
    }
}

impl FromStr for ChatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "private" => Ok(ChatType::Private),
            "bot" => Ok(ChatType::Bot),
            "group" => Ok(ChatType::Group),
            "channel" => Ok(ChatType::Channel),
            other => Err(format!("invalid chat type: '{other}'")),
        }
    }
}

/// Kind of chat participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    User,
    Character,
    Bot,
}

impl fmt::Display for MemberType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberType::User => write!(f, "user"),
            MemberType::Character => write!(f, "character"),
            MemberType::Bot => write!(f, "bot"),
        }
    }
}

impl FromStr for MemberType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MemberType::User),
            "character" => Ok(MemberType::Character),
            "bot" => Ok(MemberType::Bot),
            other => Err(format!("invalid member type: '{other}'")),
        }
    }
}

/// Author role of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
    Error,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::Tool => "tool",
            MessageRole::Error => "error",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "system" => Ok(MessageRole::System),
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "tool" => Ok(MessageRole::Tool),
            "error" => Ok(MessageRole::Error),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// A durable chat record.
///
/// Chats are never hard-deleted; `deleted_at` marks a tombstone so that
/// delta sync can still report the deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    pub title: Option<String>,
    pub created_at: Millis,
    pub updated_at: Millis,
    pub deleted_at: Option<Millis>,
}

impl Chat {
    pub fn is_tombstoned(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A chat participant.
///
/// Identity key is `(chat_id, member_type, subject)` where the subject is the
/// user id for `user` members and the character id otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    pub chat_id: String,
    pub member_type: MemberType,
    pub user_id: Option<String>,
    pub character_id: Option<String>,
}

impl ChatMember {
    /// The id half of the identity key, if the member carries one.
    pub fn subject_id(&self) -> Option<&str> {
        match self.member_type {
            MemberType::User => self.user_id.as_deref(),
            MemberType::Character | MemberType::Bot => self.character_id.as_deref(),
        }
    }
}

/// A durable message. Ids are unique across all chats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: Millis,
    pub updated_at: Millis,
    pub deleted_at: Option<Millis>,
}

// ---------------------------------------------------------------------------
// Sync payload (POST /sync)
// ---------------------------------------------------------------------------

/// Inbound sync request merged by the sync engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChatPayload {
    pub chat: SyncChatFields,
    #[serde(default)]
    pub members: Vec<SyncMemberPayload>,
    pub messages: Vec<SyncMessagePayload>,
}

/// Chat fields of a sync payload. Absent fields are left untouched on update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChatFields {
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub chat_type: Option<ChatType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Millis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<Millis>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMemberPayload {
    #[serde(rename = "type")]
    pub member_type: MemberType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
}

impl SyncMemberPayload {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            member_type: MemberType::User,
            user_id: Some(user_id.into()),
            character_id: None,
        }
    }

    pub fn character(character_id: impl Into<String>) -> Self {
        Self {
            member_type: MemberType::Character,
            user_id: None,
            character_id: Some(character_id.into()),
        }
    }

    /// The id half of the identity key, if present and non-empty.
    pub fn subject_id(&self) -> Option<&str> {
        let id = match self.member_type {
            MemberType::User => self.user_id.as_deref(),
            MemberType::Character | MemberType::Bot => self.character_id.as_deref(),
        };
        id.filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessagePayload {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Millis>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncChatResult {
    pub chat_id: String,
}

// ---------------------------------------------------------------------------
// Read shapes
// ---------------------------------------------------------------------------

/// Chat metadata as returned by the list, delta, and snapshot endpoints,
/// annotated with the chat's first character member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub chat_type: ChatType,
    #[serde(default)]
    pub title: Option<String>,
    pub created_at: Millis,
    pub updated_at: Millis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Millis>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_id: Option<String>,
}

impl ChatSummary {
    pub fn from_chat(chat: Chat, character_id: Option<String>) -> Self {
        Self {
            id: chat.id,
            chat_type: chat.chat_type,
            title: chat.title,
            created_at: chat.created_at,
            updated_at: chat.updated_at,
            deleted_at: chat.deleted_at,
            character_id,
        }
    }
}

/// A message as returned by the paginated message endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageView {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: Millis,
}

impl From<Message> for ChatMessageView {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            created_at: message.created_at,
        }
    }
}

/// Chat metadata plus one page of its messages, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub chat: ChatSummary,
    pub messages: Vec<ChatMessageView>,
}

/// Chats changed since a watermark, including tombstones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatDelta {
    pub chats: Vec<ChatSummary>,
    pub deleted_chat_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedChat {
    pub chat_id: String,
    pub deleted_at: Millis,
}

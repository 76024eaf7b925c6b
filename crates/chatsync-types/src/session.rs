//! Client-side session shapes: chat items, session records, the
//! per-user sessions index, and the bulk export envelope.
//!
//! These are the values persisted through the local cache. Field names are
//! camelCase so exported files match the remote wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chat::{MessageRole, Millis};

/// Envelope format tag for bulk export/import.
pub const EXPORT_FORMAT: &str = "chat-sessions-index:v1";

/// Character id used when no character is selected. Never pushed as a member.
pub const DEFAULT_CHARACTER_ID: &str = "default";

/// User id used when no user is signed in.
pub const LOCAL_USER_ID: &str = "local";

/// One segment of structured message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContentPart {
    Plain(String),
    Text { text: String },
    Other(serde_json::Value),
}

impl ContentPart {
    fn text(&self) -> &str {
        match self {
            ContentPart::Plain(s) => s,
            ContentPart::Text { text } => text,
            ContentPart::Other(_) => "",
        }
    }
}

/// Message content: plain text or a list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Flatten to text: text parts are concatenated, other parts dropped.
    pub fn to_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts.iter().map(ContentPart::text).collect(),
        }
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        MessageContent::Text(s)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        MessageContent::Text(s.to_string())
    }
}

/// A single item of a local chat transcript.
///
/// `id` may be missing on items created before they were ever synced; the
/// session store assigns one before persisting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Millis>,
}

impl ChatHistoryItem {
    pub fn new(
        id: impl Into<String>,
        role: MessageRole,
        content: impl Into<MessageContent>,
        created_at: Millis,
    ) -> Self {
        Self {
            id: Some(id.into()),
            role,
            content: content.into(),
            created_at: Some(created_at),
        }
    }
}

/// Local projection of a remote chat, scoped to a character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionMeta {
    pub session_id: String,
    pub user_id: String,
    pub character_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: Millis,
    pub updated_at: Millis,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Millis>,
}

/// A cached session: metadata plus its full transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSessionRecord {
    pub meta: ChatSessionMeta,
    pub messages: Vec<ChatHistoryItem>,
}

/// Sessions of one character.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterSessions {
    /// Empty only transiently while a session is being created.
    pub active_session_id: String,
    pub sessions: BTreeMap<String, ChatSessionMeta>,
}

/// Denormalized per-user view of all known session metas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionsIndex {
    pub user_id: String,
    pub characters: BTreeMap<String, CharacterSessions>,
}

impl ChatSessionsIndex {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            characters: BTreeMap::new(),
        }
    }

    /// Rebuild an index by replaying metas in order.
    pub fn from_metas<'a>(
        user_id: impl Into<String>,
        metas: impl IntoIterator<Item = &'a ChatSessionMeta>,
    ) -> Self {
        let mut index = Self::new(user_id);
        for meta in metas {
            index.upsert_meta(meta.clone());
        }
        index
    }

    /// Insert a meta under its character.
    ///
    /// The stored meta is replaced only when the incoming one is not older.
    /// A missing character entry is created with this session active, and an
    /// empty active pointer is filled.
    pub fn upsert_meta(&mut self, meta: ChatSessionMeta) {
        let character = self
            .characters
            .entry(meta.character_id.clone())
            .or_insert_with(|| CharacterSessions {
                active_session_id: meta.session_id.clone(),
                sessions: BTreeMap::new(),
            });

        if character.active_session_id.is_empty() {
            character.active_session_id = meta.session_id.clone();
        }

        let replace = character
            .sessions
            .get(&meta.session_id)
            .is_none_or(|existing| existing.updated_at <= meta.updated_at);
        if replace {
            character.sessions.insert(meta.session_id.clone(), meta);
        }
    }

    pub fn character(&self, character_id: &str) -> Option<&CharacterSessions> {
        self.characters.get(character_id)
    }

    pub fn character_mut(&mut self, character_id: &str) -> Option<&mut CharacterSessions> {
        self.characters.get_mut(character_id)
    }

    /// All session ids across characters.
    pub fn session_ids(&self) -> impl Iterator<Item = &str> {
        self.characters
            .values()
            .flat_map(|character| character.sessions.keys().map(String::as_str))
    }

    pub fn find_meta(&self, session_id: &str) -> Option<&ChatSessionMeta> {
        self.characters
            .values()
            .find_map(|character| character.sessions.get(session_id))
    }
}

/// Bulk transfer envelope (`chat-sessions-index:v1`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSessionsExport {
    pub format: String,
    pub index: ChatSessionsIndex,
    pub sessions: BTreeMap<String, ChatSessionRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(session_id: &str, character_id: &str, updated_at: Millis) -> ChatSessionMeta {
        ChatSessionMeta {
            session_id: session_id.to_string(),
            user_id: "u-1".to_string(),
            character_id: character_id.to_string(),
            title: None,
            created_at: 0,
            updated_at,
            deleted_at: None,
        }
    }

    #[test]
    fn test_upsert_meta_creates_character_with_active_pointer() {
        let mut index = ChatSessionsIndex::new("u-1");
        index.upsert_meta(meta("s-1", "char-x", 10));
        let character = index.character("char-x").unwrap();
        assert_eq!(character.active_session_id, "s-1");
        assert!(character.sessions.contains_key("s-1"));
    }

    #[test]
    fn test_upsert_meta_keeps_newer_stored_meta() {
        let mut index = ChatSessionsIndex::new("u-1");
        index.upsert_meta(meta("s-1", "char-x", 500));
        index.upsert_meta(meta("s-1", "char-x", 400));
        assert_eq!(index.find_meta("s-1").unwrap().updated_at, 500);

        index.upsert_meta(meta("s-1", "char-x", 600));
        assert_eq!(index.find_meta("s-1").unwrap().updated_at, 600);
    }

    #[test]
    fn test_from_metas_replays_in_order() {
        let metas = [meta("a", "x", 1), meta("b", "x", 2), meta("c", "y", 3)];
        let index = ChatSessionsIndex::from_metas("u-1", metas.iter());
        assert_eq!(index.character("x").unwrap().active_session_id, "a");
        assert_eq!(index.session_ids().count(), 3);
    }

    #[test]
    fn test_content_parts_flatten_to_text() {
        let json = r#"[{"text": "hello "}, "world", {"type": "image_url", "url": "x"}]"#;
        let content: MessageContent = serde_json::from_str(json).unwrap();
        assert_eq!(content.to_text(), "hello world");
    }

    #[test]
    fn test_history_item_without_id_deserializes() {
        let json = r#"{"role": "assistant", "content": "hi"}"#;
        let item: ChatHistoryItem = serde_json::from_str(json).unwrap();
        assert!(item.id.is_none());
        assert_eq!(item.content, MessageContent::Text("hi".to_string()));
    }
}

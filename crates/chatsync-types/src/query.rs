//! Read-path options for the chat list, delta, and message page queries.
//!
//! Each options type mirrors the query string of its endpoint. `validate`
//! rejects out-of-range values (mapped to HTTP 400); `effective_limit`
//! applies the default and clamps into range for callers that skip validation.

use serde::{Deserialize, Serialize};

use crate::chat::Millis;
use crate::error::ChatError;

pub const CHAT_LIST_DEFAULT_LIMIT: i64 = 50;
pub const CHAT_LIST_MAX_LIMIT: i64 = 200;
pub const MESSAGE_PAGE_DEFAULT_LIMIT: i64 = 200;
pub const MESSAGE_PAGE_MAX_LIMIT: i64 = 1000;

fn check_limit(limit: Option<i64>, max: i64) -> Result<(), ChatError> {
    match limit {
        Some(limit) if !(1..=max).contains(&limit) => Err(ChatError::Validation(format!(
            "limit must be between 1 and {max}, got {limit}"
        ))),
        _ => Ok(()),
    }
}

fn check_timestamp(name: &str, value: Option<Millis>) -> Result<(), ChatError> {
    match value {
        Some(value) if value < 0 => Err(ChatError::Validation(format!(
            "{name} must be >= 0, got {value}"
        ))),
        _ => Ok(()),
    }
}

/// Options for `GET /` (list chats).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatListOptions {
    pub limit: Option<i64>,
    /// Strict upper bound on `updated_at`.
    pub before_updated_at: Option<Millis>,
}

impl ChatListOptions {
    pub fn validate(&self) -> Result<(), ChatError> {
        check_limit(self.limit, CHAT_LIST_MAX_LIMIT)?;
        check_timestamp("beforeUpdatedAt", self.before_updated_at)
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(CHAT_LIST_DEFAULT_LIMIT)
            .clamp(1, CHAT_LIST_MAX_LIMIT)
    }
}

/// Options for `GET /delta`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDeltaOptions {
    /// Exclusive lower bound on `updated_at` / `deleted_at`. Defaults to 0.
    pub since_updated_at: Option<Millis>,
    pub limit: Option<i64>,
}

impl ChatDeltaOptions {
    pub fn validate(&self) -> Result<(), ChatError> {
        check_limit(self.limit, CHAT_LIST_MAX_LIMIT)?;
        check_timestamp("sinceUpdatedAt", self.since_updated_at)
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(CHAT_LIST_DEFAULT_LIMIT)
            .clamp(1, CHAT_LIST_MAX_LIMIT)
    }

    pub fn since(&self) -> Millis {
        self.since_updated_at.unwrap_or(0).max(0)
    }
}

/// Options for `GET /:chatId/messages` and `GET /:chatId/snapshot`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePageOptions {
    pub limit: Option<i64>,
    /// Strict upper bound on `created_at`: the `created_at` of the oldest
    /// item of the previous page.
    pub before_created_at: Option<Millis>,
}

impl MessagePageOptions {
    pub fn validate(&self) -> Result<(), ChatError> {
        check_limit(self.limit, MESSAGE_PAGE_MAX_LIMIT)?;
        check_timestamp("beforeCreatedAt", self.before_created_at)
    }

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(MESSAGE_PAGE_DEFAULT_LIMIT)
            .clamp(1, MESSAGE_PAGE_MAX_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_limit_bounds() {
        assert!(ChatListOptions { limit: Some(0), ..Default::default() }.validate().is_err());
        assert!(ChatListOptions { limit: Some(201), ..Default::default() }.validate().is_err());
        assert!(ChatListOptions { limit: Some(200), ..Default::default() }.validate().is_ok());
        assert_eq!(ChatListOptions::default().effective_limit(), 50);
    }

    #[test]
    fn test_message_page_limit_bounds() {
        let opts = MessagePageOptions { limit: Some(1001), before_created_at: None };
        assert!(matches!(opts.validate(), Err(ChatError::Validation(_))));
        assert_eq!(opts.effective_limit(), 1000);
        assert_eq!(MessagePageOptions::default().effective_limit(), 200);
    }

    #[test]
    fn test_negative_cursor_rejected() {
        let opts = MessagePageOptions { limit: None, before_created_at: Some(-1) };
        assert!(opts.validate().is_err());
        let delta = ChatDeltaOptions { since_updated_at: Some(-5), limit: None };
        assert!(delta.validate().is_err());
    }

    #[test]
    fn test_delta_since_defaults_to_zero() {
        assert_eq!(ChatDeltaOptions::default().since(), 0);
    }
}

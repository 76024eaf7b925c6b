//! SQLite session cache implementation.
//!
//! Implements `SessionCache` from `chatsync-core`. Records and indexes are
//! stored as JSON text keyed by session id and user id and deserialized on read.

use chatsync_core::session::cache::SessionCache;
use chatsync_types::chat::now_millis;
use chatsync_types::error::CacheError;
use chatsync_types::session::{ChatSessionRecord, ChatSessionsIndex};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SessionCache`.
#[derive(Clone)]
pub struct SqliteSessionCache {
    pool: DatabasePool,
}

impl SqliteSessionCache {
    /// Create a new cache backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Ids of every cached record, for diagnostics and the local CLI.
    pub async fn cached_session_ids(&self) -> Result<Vec<String>, CacheError> {
        let rows = sqlx::query("SELECT session_id FROM session_records ORDER BY session_id")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(storage_err)?;

        rows.iter()
            .map(|row| row.try_get("session_id").map_err(storage_err))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage_err(e: sqlx::Error) -> CacheError {
    CacheError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> Result<String, CacheError> {
    serde_json::to_string(value).map_err(|e| CacheError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, CacheError> {
    serde_json::from_str(text).map_err(|e| CacheError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// SessionCache implementation
// ---------------------------------------------------------------------------

impl SessionCache for SqliteSessionCache {
    async fn get_session(&self, session_id: &str) -> Result<Option<ChatSessionRecord>, CacheError> {
        let row = sqlx::query("SELECT record FROM session_records WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage_err)?;

        match row {
            Some(row) => {
                let text: String = row.try_get("record").map_err(storage_err)?;
                Ok(Some(decode(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn save_session(
        &self,
        session_id: &str,
        record: &ChatSessionRecord,
    ) -> Result<(), CacheError> {
        let text = encode(record)?;

        sqlx::query(
            "INSERT INTO session_records (session_id, record, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET record = excluded.record, updated_at = excluded.updated_at",
        )
        .bind(session_id)
        .bind(&text)
        .bind(now_millis())
        .execute(&self.pool.writer)
        .await
        .map_err(storage_err)?;

        tracing::trace!(session_id, messages = record.messages.len(), "cached session record");
        Ok(())
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), CacheError> {
        sqlx::query("DELETE FROM session_records WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool.writer)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    async fn get_index(&self, user_id: &str) -> Result<Option<ChatSessionsIndex>, CacheError> {
        let row = sqlx::query("SELECT idx FROM session_indexes WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(storage_err)?;

        match row {
            Some(row) => {
                let text: String = row.try_get("idx").map_err(storage_err)?;
                Ok(Some(decode(&text)?))
            }
            None => Ok(None),
        }
    }

    async fn save_index(&self, index: &ChatSessionsIndex) -> Result<(), CacheError> {
        let text = encode(index)?;

        sqlx::query(
            "INSERT INTO session_indexes (user_id, idx, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET idx = excluded.idx, updated_at = excluded.updated_at",
        )
        .bind(&index.user_id)
        .bind(&text)
        .bind(now_millis())
        .execute(&self.pool.writer)
        .await
        .map_err(storage_err)?;

        Ok(())
    }
}

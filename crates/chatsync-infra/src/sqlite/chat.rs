//! SQLite chat repository implementation.
//!
//! Implements `ChatRepository` and `ChatTransaction` from `chatsync-core`
//! using sqlx with split read/write pools: raw queries, private Row structs,
//! reads on the reader pool, every write inside a writer transaction.

use chatsync_core::chat::repository::{ChatRepository, ChatTransaction};
use chatsync_types::chat::{Chat, ChatMember, Message, Millis, now_millis};
use chatsync_types::error::RepositoryError;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ChatRepository`.
#[derive(Clone)]
pub struct SqliteChatRepository {
    pool: DatabasePool,
}

impl SqliteChatRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

/// One writer transaction. Dropping it without `commit` rolls back.
pub struct SqliteChatTransaction {
    tx: Transaction<'static, Sqlite>,
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ChatRow {
    id: String,
    chat_type: String,
    title: Option<String>,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl ChatRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            chat_type: row.try_get("chat_type")?,
            title: row.try_get("title")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    fn into_chat(self) -> Result<Chat, RepositoryError> {
        let chat_type = self
            .chat_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(Chat {
            id: self.id,
            chat_type,
            title: self.title,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

struct MemberRow {
    chat_id: String,
    member_type: String,
    user_id: Option<String>,
    character_id: Option<String>,
}

impl MemberRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            chat_id: row.try_get("chat_id")?,
            member_type: row.try_get("member_type")?,
            user_id: row.try_get("user_id")?,
            character_id: row.try_get("character_id")?,
        })
    }

    fn into_member(self) -> Result<ChatMember, RepositoryError> {
        let member_type = self
            .member_type
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(ChatMember {
            chat_id: self.chat_id,
            member_type,
            user_id: self.user_id,
            character_id: self.character_id,
        })
    }
}

struct MessageRow {
    id: String,
    chat_id: String,
    sender_id: String,
    role: String,
    content: String,
    created_at: i64,
    updated_at: i64,
    deleted_at: Option<i64>,
}

impl MessageRow {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            chat_id: row.try_get("chat_id")?,
            sender_id: row.try_get("sender_id")?,
            role: row.try_get("role")?,
            content: row.try_get("content")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }

    fn into_message(self) -> Result<Message, RepositoryError> {
        let role = self
            .role
            .parse()
            .map_err(|e: String| RepositoryError::Query(e))?;

        Ok(Message {
            id: self.id,
            chat_id: self.chat_id,
            sender_id: self.sender_id,
            role,
            content: self.content,
            created_at: self.created_at,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_err(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

/// Map a UNIQUE violation to `Conflict`, anything else to `Query`.
fn write_err(e: sqlx::Error, what: impl FnOnce() -> String) -> RepositoryError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.message().contains("UNIQUE") {
            return RepositoryError::Conflict(what());
        }
    }
    RepositoryError::Query(e.to_string())
}

fn chats_from_rows(rows: &[SqliteRow]) -> Result<Vec<Chat>, RepositoryError> {
    rows.iter()
        .map(|row| ChatRow::from_row(row).map_err(query_err)?.into_chat())
        .collect()
}

fn members_from_rows(rows: &[SqliteRow]) -> Result<Vec<ChatMember>, RepositoryError> {
    rows.iter()
        .map(|row| MemberRow::from_row(row).map_err(query_err)?.into_member())
        .collect()
}

const IS_USER_MEMBER_SQL: &str = "SELECT 1 FROM chat_members
     WHERE chat_id = ? AND member_type = 'user' AND user_id = ? LIMIT 1";

// ---------------------------------------------------------------------------
// ChatRepository implementation
// ---------------------------------------------------------------------------

impl ChatRepository for SqliteChatRepository {
    type Tx = SqliteChatTransaction;

    async fn begin(&self) -> Result<SqliteChatTransaction, RepositoryError> {
        let tx = self.pool.writer.begin().await.map_err(query_err)?;
        Ok(SqliteChatTransaction { tx })
    }

    async fn is_user_member(&self, chat_id: &str, user_id: &str) -> Result<bool, RepositoryError> {
        let row = sqlx::query(IS_USER_MEMBER_SQL)
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;
        Ok(row.is_some())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        match row {
            Some(row) => {
                let chat_row = ChatRow::from_row(&row).map_err(query_err)?;
                Ok(Some(chat_row.into_chat()?))
            }
            None => Ok(None),
        }
    }

    async fn list_member_chats(
        &self,
        user_id: &str,
        limit: i64,
        before_updated_at: Option<Millis>,
    ) -> Result<Vec<Chat>, RepositoryError> {
        let mut sql = String::from(
            "SELECT c.* FROM chats c
             WHERE c.deleted_at IS NULL
               AND EXISTS (SELECT 1 FROM chat_members m
                           WHERE m.chat_id = c.id AND m.member_type = 'user' AND m.user_id = ?)",
        );
        if before_updated_at.is_some() {
            sql.push_str(" AND c.updated_at < ?");
        }
        sql.push_str(" ORDER BY c.updated_at DESC, c.id DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(user_id);
        if let Some(before) = before_updated_at {
            query = query.bind(before);
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        chats_from_rows(&rows)
    }

    async fn list_member_chats_changed_since(
        &self,
        user_id: &str,
        since: Millis,
        limit: i64,
    ) -> Result<Vec<Chat>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT c.* FROM chats c
             WHERE (c.updated_at > ? OR c.deleted_at > ?)
               AND EXISTS (SELECT 1 FROM chat_members m
                           WHERE m.chat_id = c.id AND m.member_type = 'user' AND m.user_id = ?)
             ORDER BY c.updated_at ASC, c.id ASC
             LIMIT ?",
        )
        .bind(since)
        .bind(since)
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        chats_from_rows(&rows)
    }

    async fn list_members(&self, chat_ids: &[String]) -> Result<Vec<ChatMember>, RepositoryError> {
        if chat_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; chat_ids.len()].join(", ");
        let sql = format!(
            "SELECT chat_id, member_type, user_id, character_id FROM chat_members
             WHERE chat_id IN ({placeholders}) ORDER BY id ASC"
        );

        let mut query = sqlx::query(&sql);
        for chat_id in chat_ids {
            query = query.bind(chat_id);
        }
        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        members_from_rows(&rows)
    }

    async fn list_messages_newest_first(
        &self,
        chat_id: &str,
        limit: i64,
        before_created_at: Option<Millis>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let mut sql =
            String::from("SELECT * FROM messages WHERE chat_id = ? AND deleted_at IS NULL");
        if before_created_at.is_some() {
            sql.push_str(" AND created_at < ?");
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(chat_id);
        if let Some(before) = before_created_at {
            query = query.bind(before);
        }
        let rows = query
            .bind(limit)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_err)?;

        rows.iter()
            .map(|row| MessageRow::from_row(row).map_err(query_err)?.into_message())
            .collect()
    }

    async fn soft_delete_chat(&self, chat_id: &str, deleted_at: Millis) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE chats SET deleted_at = ?, updated_at = MAX(updated_at, ?) WHERE id = ?",
        )
        .bind(deleted_at)
        .bind(deleted_at)
        .bind(chat_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ChatTransaction implementation
// ---------------------------------------------------------------------------

impl ChatTransaction for SqliteChatTransaction {
    async fn find_chat(&mut self, chat_id: &str) -> Result<Option<Chat>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM chats WHERE id = ?")
            .bind(chat_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(query_err)?;

        row.map(|row| ChatRow::from_row(&row).map_err(query_err)?.into_chat())
            .transpose()
    }

    async fn is_user_member(&mut self, chat_id: &str, user_id: &str) -> Result<bool, RepositoryError> {
        let row = sqlx::query(IS_USER_MEMBER_SQL)
            .bind(chat_id)
            .bind(user_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(query_err)?;
        Ok(row.is_some())
    }

    async fn insert_chat(&mut self, chat: &Chat) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chats (id, chat_type, title, created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&chat.id)
        .bind(chat.chat_type.to_string())
        .bind(&chat.title)
        .bind(chat.created_at)
        .bind(chat.updated_at)
        .bind(chat.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| write_err(e, || format!("chat {} already exists", chat.id)))?;

        Ok(())
    }

    async fn update_chat(&mut self, chat: &Chat) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE chats SET chat_type = ?, title = ?, updated_at = ? WHERE id = ?",
        )
        .bind(chat.chat_type.to_string())
        .bind(&chat.title)
        .bind(chat.updated_at)
        .bind(&chat.id)
        .execute(&mut *self.tx)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn list_members(&mut self, chat_id: &str) -> Result<Vec<ChatMember>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT chat_id, member_type, user_id, character_id FROM chat_members
             WHERE chat_id = ? ORDER BY id ASC",
        )
        .bind(chat_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(query_err)?;

        members_from_rows(&rows)
    }

    async fn insert_member(&mut self, member: &ChatMember) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO chat_members (chat_id, member_type, user_id, character_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&member.chat_id)
        .bind(member.member_type.to_string())
        .bind(&member.user_id)
        .bind(&member.character_id)
        .bind(now_millis())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            write_err(e, || {
                format!(
                    "{} member {} already on chat {}",
                    member.member_type,
                    member.subject_id().unwrap_or_default(),
                    member.chat_id
                )
            })
        })?;

        Ok(())
    }

    async fn find_message(&mut self, message_id: &str) -> Result<Option<Message>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(query_err)?;

        row.map(|row| MessageRow::from_row(&row).map_err(query_err)?.into_message())
            .transpose()
    }

    async fn insert_message(&mut self, message: &Message) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO messages (id, chat_id, sender_id, role, content, created_at, updated_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id)
        .bind(&message.chat_id)
        .bind(&message.sender_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .bind(message.updated_at)
        .bind(message.deleted_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| write_err(e, || format!("message {} already exists", message.id)))?;

        Ok(())
    }

    async fn update_message(&mut self, message: &Message) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE messages SET sender_id = ?, role = ?, content = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&message.sender_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.updated_at)
        .bind(&message.id)
        .execute(&mut *self.tx)
        .await
        .map_err(query_err)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn commit(self) -> Result<(), RepositoryError> {
        self.tx.commit().await.map_err(query_err)
    }
}

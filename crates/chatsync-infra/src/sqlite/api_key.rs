//! API key storage.
//!
//! Keys are shown once at creation; only their SHA-256 hash is stored. A key
//! resolves to the user id it was issued for.

use chatsync_types::chat::now_millis;
use chatsync_types::error::RepositoryError;
use sha2::{Digest, Sha256};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

const KEY_PREFIX: &str = "cs_";

/// A stored key, without its secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyInfo {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub created_at: i64,
    pub last_used_at: Option<i64>,
}

/// SQLite-backed API key store.
#[derive(Clone)]
pub struct SqliteApiKeyStore {
    pool: DatabasePool,
}

/// Compute SHA-256 hash of an API key (lowercase hex).
pub fn hash_api_key(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("{:x}", digest)
}

fn generate_key() -> String {
    format!(
        "{KEY_PREFIX}{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )
}

impl SqliteApiKeyStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Issue a key for `user_id`. Returns the plaintext key.
    pub async fn create_key(&self, user_id: &str, name: &str) -> Result<String, RepositoryError> {
        let plaintext_key = generate_key();
        let id = Uuid::now_v7().to_string();

        sqlx::query(
            "INSERT INTO api_keys (id, name, user_id, key_hash, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(name)
        .bind(user_id)
        .bind(hash_api_key(&plaintext_key))
        .bind(now_millis())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::info!(key_id = %id, user_id, "issued API key");
        Ok(plaintext_key)
    }

    /// The user a key was issued for, if the key is known.
    ///
    /// Updates `last_used_at` on success (best effort).
    pub async fn resolve_user(&self, key: &str) -> Result<Option<String>, RepositoryError> {
        let row = sqlx::query("SELECT id, user_id FROM api_keys WHERE key_hash = ?")
            .bind(hash_api_key(key))
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row
            .try_get("id")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        let user_id: String = row
            .try_get("user_id")
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if let Err(e) = sqlx::query("UPDATE api_keys SET last_used_at = ? WHERE id = ?")
            .bind(now_millis())
            .bind(&id)
            .execute(&self.pool.writer)
            .await
        {
            tracing::debug!(key_id = %id, error = %e, "failed to touch api key");
        }

        Ok(Some(user_id))
    }

    pub async fn list_keys(&self) -> Result<Vec<ApiKeyInfo>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, user_id, created_at, last_used_at FROM api_keys ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(ApiKeyInfo {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    user_id: row.try_get("user_id")?,
                    created_at: row.try_get("created_at")?,
                    last_used_at: row.try_get("last_used_at")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(|e| RepositoryError::Query(e.to_string()))
    }

    pub async fn revoke_key(&self, id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = ?")
            .bind(id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteApiKeyStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("keys.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        std::mem::forget(dir);
        SqliteApiKeyStore::new(DatabasePool::new(&url).await.unwrap())
    }

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = hash_api_key("cs_abc");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_api_key("cs_abc"));
        assert_ne!(hash, hash_api_key("cs_abd"));
    }

    #[tokio::test]
    async fn test_create_and_resolve() {
        let store = test_store().await;
        let key = store.create_key("u-1", "laptop").await.unwrap();
        assert!(key.starts_with(KEY_PREFIX));

        assert_eq!(store.resolve_user(&key).await.unwrap().as_deref(), Some("u-1"));
        assert!(store.resolve_user("cs_unknown").await.unwrap().is_none());

        let keys = store.list_keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name, "laptop");
        assert!(keys[0].last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_revoke() {
        let store = test_store().await;
        let key = store.create_key("u-1", "old").await.unwrap();
        let id = store.list_keys().await.unwrap()[0].id.clone();

        store.revoke_key(&id).await.unwrap();
        assert!(store.resolve_user(&key).await.unwrap().is_none());
        assert!(matches!(store.revoke_key(&id).await, Err(RepositoryError::NotFound)));
    }
}

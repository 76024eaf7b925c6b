//! Local cache port: per-device persistence for session records and the
//! sessions index.

use std::future::Future;

use chatsync_types::error::CacheError;
use chatsync_types::session::{ChatSessionRecord, ChatSessionsIndex};

/// Get/save/delete primitives over the on-device store.
///
/// Records are keyed by session id, the index by user id.
/// Implementations live in chatsync-infra (e.g., `SqliteSessionCache`).
pub trait SessionCache: Send + Sync + 'static {
    fn get_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<Option<ChatSessionRecord>, CacheError>> + Send;

    fn save_session(
        &self,
        session_id: &str,
        record: &ChatSessionRecord,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Deleting an absent session is not an error.
    fn delete_session(
        &self,
        session_id: &str,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn get_index(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Option<ChatSessionsIndex>, CacheError>> + Send;

    /// Save under `index.user_id`, replacing any previous index of that user.
    fn save_index(
        &self,
        index: &ChatSessionsIndex,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
}

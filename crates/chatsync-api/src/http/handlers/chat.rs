//! Chat sync and read HTTP handlers.
//!
//! Endpoints:
//! - GET    /api/v1/chats                    - List live chats, newest first
//! - GET    /api/v1/chats/delta              - Chats changed since a watermark
//! - POST   /api/v1/chats/sync               - Merge a client snapshot
//! - GET    /api/v1/chats/{chat_id}/messages - One page of messages
//! - GET    /api/v1/chats/{chat_id}/snapshot - Chat meta plus a message page
//! - DELETE /api/v1/chats/{chat_id}          - Tombstone a chat

use axum::Json;
use axum::extract::{Path, State};
use chatsync_types::chat::{
    ChatDelta, ChatMessageView, ChatSnapshot, ChatSummary, DeletedChat, SyncChatPayload,
    SyncChatResult,
};
use chatsync_types::error::ChatError;
use chatsync_types::query::{ChatDeltaOptions, ChatListOptions, MessagePageOptions};

use crate::http::error::AppError;
use crate::http::extractors::auth::CurrentUser;
use crate::http::extractors::query::{ValidJson, ValidQuery};
use crate::http::response::{ApiResponse, RequestTimer};
use crate::state::AppState;

type ApiResult<T> = Result<Json<ApiResponse<T>>, AppError>;

/// GET /api/v1/chats
pub async fn list_chats(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidQuery(options): ValidQuery<ChatListOptions>,
) -> ApiResult<Vec<ChatSummary>> {
    let timer = RequestTimer::start();
    let chats = state.chat_queries.list_chats(&user.user_id, &options).await?;
    Ok(Json(timer.finish(chats).with_link("self", "/api/v1/chats")))
}

/// GET /api/v1/chats/delta
pub async fn chat_delta(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidQuery(options): ValidQuery<ChatDeltaOptions>,
) -> ApiResult<ChatDelta> {
    let timer = RequestTimer::start();
    let delta = state
        .chat_queries
        .list_chat_delta(&user.user_id, &options)
        .await?;
    Ok(Json(timer.finish(delta)))
}

/// POST /api/v1/chats/sync
pub async fn sync_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    ValidJson(payload): ValidJson<SyncChatPayload>,
) -> ApiResult<SyncChatResult> {
    let timer = RequestTimer::start();
    let result = state.sync_engine.sync_chat(&user.user_id, &payload).await?;
    Ok(Json(timer.finish(result)))
}

/// GET /api/v1/chats/{chat_id}/messages
pub async fn list_messages(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
    ValidQuery(options): ValidQuery<MessagePageOptions>,
) -> ApiResult<Vec<ChatMessageView>> {
    let timer = RequestTimer::start();
    let messages = state
        .chat_queries
        .list_chat_messages(&user.user_id, &chat_id, &options)
        .await?;
    Ok(Json(timer.finish(messages)))
}

/// GET /api/v1/chats/{chat_id}/snapshot
///
/// A missing or tombstoned chat is a 404.
pub async fn get_snapshot(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
    ValidQuery(options): ValidQuery<MessagePageOptions>,
) -> ApiResult<ChatSnapshot> {
    let timer = RequestTimer::start();
    let snapshot = state
        .chat_queries
        .get_chat_snapshot(&user.user_id, &chat_id, &options)
        .await?
        .ok_or(ChatError::NotFound)?;

    let href = format!("/api/v1/chats/{chat_id}/snapshot");
    Ok(Json(timer.finish(snapshot).with_link("self", &href)))
}

/// DELETE /api/v1/chats/{chat_id}
pub async fn delete_chat(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(chat_id): Path<String>,
) -> ApiResult<DeletedChat> {
    let timer = RequestTimer::start();
    let deleted = state
        .chat_queries
        .soft_delete_chat(&user.user_id, &chat_id)
        .await?;
    Ok(Json(timer.finish(deleted)))
}

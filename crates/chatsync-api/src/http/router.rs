//! Axum router configuration with middleware.
//!
//! Chat routes are under `/api/v1/chats`; `/health` is unauthenticated.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/chats", get(handlers::chat::list_chats))
        .route("/chats/delta", get(handlers::chat::chat_delta))
        .route("/chats/sync", post(handlers::chat::sync_chat))
        .route("/chats/{chat_id}", delete(handlers::chat::delete_chat))
        .route(
            "/chats/{chat_id}/messages",
            get(handlers::chat::list_messages),
        )
        .route(
            "/chats/{chat_id}/snapshot",
            get(handlers::chat::get_snapshot),
        );

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

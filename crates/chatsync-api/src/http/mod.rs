//! HTTP/REST API layer for chatsync.
//!
//! Axum-based REST API at `/api/v1/chats` with API key authentication and
//! envelope response format.

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod response;
pub mod router;

#[cfg(test)]
mod tests;

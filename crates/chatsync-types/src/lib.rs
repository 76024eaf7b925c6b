//! Shared domain types for chatsync.
//!
//! This crate contains the types shared by the server-side merge/query logic
//! and the client-side session store: chats, members, messages, the sync wire
//! payloads, the local session index, configuration, and error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod query;
pub mod session;

//! Infrastructure layer for chatsync.
//!
//! Contains implementations of the ports defined in `chatsync-core`:
//! SQLite storage for the durable chat record and the on-device session
//! cache, the HTTP client for the remote chat API, and config/data-dir
//! resolution.

pub mod config;
pub mod filesystem;
pub mod remote;
pub mod sqlite;

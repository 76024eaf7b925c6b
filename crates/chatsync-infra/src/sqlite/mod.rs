//! SQLite storage layer.
//!
//! Repository and cache implementations backed by SQLite with WAL mode and
//! split read/write connection pools.

pub mod api_key;
pub mod chat;
pub mod pool;
pub mod session_cache;

//! Clients for a remote chatsync server.

pub mod http;

//! Business logic and port definitions for chatsync.
//!
//! Server side: [`chat::sync::SyncMergeEngine`] and [`chat::query::ChatQueryService`],
//! generic over the [`chat::repository::ChatRepository`] port.
//!
//! Client side: [`session::store::LocalSessionStore`], generic over the
//! [`session::cache::SessionCache`] and [`session::remote::ChatRemote`] ports.
//!
//! This crate depends only on `chatsync-types` -- never on `chatsync-infra`
//! or any database/HTTP crate.

pub mod chat;
pub mod session;

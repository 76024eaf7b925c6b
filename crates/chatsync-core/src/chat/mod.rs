//! Server-side chat synchronization: the durable store port, the sync merge
//! engine, and the read-path query service.

pub mod query;
pub mod repository;
pub mod sync;

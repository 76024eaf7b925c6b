//! Request extractors: caller identity and validated query/body parsing.

pub mod auth;
pub mod query;

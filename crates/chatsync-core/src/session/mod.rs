//! Client-side local-first session store.
//!
//! [`store::LocalSessionStore`] owns the working copy of every session. Local
//! cache writes go through one serialized [`queue::TaskQueue`]; best-effort
//! remote pushes go through another. Server state flows back through
//! [`conflict`] (last-write-wins) and [`bootstrap`] (what to hydrate first).

pub mod bootstrap;
pub mod cache;
pub mod conflict;
pub mod generation;
pub mod queue;
pub mod record;
pub mod remote;
pub mod store;

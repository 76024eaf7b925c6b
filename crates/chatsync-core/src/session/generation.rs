//! Per-session generation counters used as cancellation tokens.
//!
//! An async operation captures a [`GenerationToken`] before its first
//! suspension point and applies its result only if the token is still
//! current. Resets, cleanups, and reimports bump the counter, so results of
//! work started before them are discarded instead of aborted.

use std::collections::HashMap;

/// Opaque session-scoped version captured at the start of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationToken {
    session_id: String,
    value: u64,
}

impl GenerationToken {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn value(&self) -> u64 {
        self.value
    }
}

#[derive(Debug, Default)]
pub struct GenerationMap {
    counters: HashMap<String, u64>,
}

impl GenerationMap {
    /// Start tracking a session at generation 0 if it is not tracked yet.
    pub fn ensure(&mut self, session_id: &str) {
        if !self.counters.contains_key(session_id) {
            self.counters.insert(session_id.to_string(), 0);
        }
    }

    pub fn get(&mut self, session_id: &str) -> u64 {
        self.ensure(session_id);
        self.counters.get(session_id).copied().unwrap_or_default()
    }

    /// Increment and return the new value.
    pub fn bump(&mut self, session_id: &str) -> u64 {
        let counter = self.counters.entry(session_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Bump every tracked session. Counters are never reset to a value a
    /// previously captured token could hold.
    pub fn bump_all(&mut self) {
        for counter in self.counters.values_mut() {
            *counter += 1;
        }
    }

    pub fn capture(&mut self, session_id: &str) -> GenerationToken {
        GenerationToken {
            session_id: session_id.to_string(),
            value: self.get(session_id),
        }
    }

    pub fn is_current(&self, token: &GenerationToken) -> bool {
        self.counters.get(&token.session_id).copied().unwrap_or_default() == token.value
    }
}

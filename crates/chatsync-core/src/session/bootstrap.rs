//! Startup hydration order.

use chatsync_types::chat::ChatSummary;
use chatsync_types::session::DEFAULT_CHARACTER_ID;

/// Pick which sessions to hydrate from the server, in order, deduplicated,
/// at most `limit` entries:
///
/// 1. the currently active local session, if any;
/// 2. the most recently updated remote session of `character_id`;
/// 3. the remaining remote sessions, most recently updated first.
pub fn select_bootstrap_sessions(
    remote: &[ChatSummary],
    character_id: &str,
    active_session_id: Option<&str>,
    limit: usize,
) -> Vec<String> {
    let mut ordered: Vec<&ChatSummary> = remote.iter().collect();
    ordered.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

    let mut picked: Vec<String> = Vec::with_capacity(limit);
    let push = |picked: &mut Vec<String>, id: &str| {
        if picked.len() < limit && !picked.iter().any(|p| p == id) {
            picked.push(id.to_string());
        }
    };

    if let Some(active) = active_session_id.filter(|id| !id.is_empty()) {
        push(&mut picked, active);
    }

    if let Some(matched) = ordered.iter().find(|chat| {
        chat.character_id.as_deref().unwrap_or(DEFAULT_CHARACTER_ID) == character_id
    }) {
        push(&mut picked, &matched.id);
    }

    for chat in &ordered {
        push(&mut picked, &chat.id);
    }

    picked
}

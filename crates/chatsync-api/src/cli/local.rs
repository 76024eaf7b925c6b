//! Local session cache commands: export, import, list, sync.
//!
//! Every command opens the store from `[client]` config, initializes it, and
//! flushes its queues before returning.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use chatsync_core::session::remote::ChatRemote;
use chatsync_types::session::{ChatSessionsExport, ChatSessionsIndex};

use crate::state::ConcreteSessionStore;

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub async fn export_sessions(store: &ConcreteSessionStore, file: &Path, json: bool) -> Result<()> {
    let export = store.export_sessions().await?;
    let text = serde_json::to_string_pretty(&export)?;
    tokio::fs::write(file, text)
        .await
        .with_context(|| format!("failed to write {}", file.display()))?;
    store.flush().await;

    if json {
        println!(
            "{}",
            serde_json::json!({"exported": export.sessions.len(), "file": file})
        );
    } else {
        println!(
            "  {} Exported {} session{} to {}",
            style("✓").green().bold(),
            style(export.sessions.len()).bold(),
            if export.sessions.len() == 1 { "" } else { "s" },
            style(file.display()).cyan()
        );
    }
    Ok(())
}

pub async fn import_sessions(store: &ConcreteSessionStore, file: &Path, json: bool) -> Result<()> {
    let text = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let payload: ChatSessionsExport = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a session export", file.display()))?;
    let imported = payload.sessions.len();

    store.initialize().await?;
    store.import_sessions(payload).await?;
    store.flush().await;

    if json {
        println!("{}", serde_json::json!({"imported": imported}));
    } else {
        println!(
            "  {} Imported {} session{}",
            style("✓").green().bold(),
            style(imported).bold(),
            if imported == 1 { "" } else { "s" }
        );
    }
    Ok(())
}

pub async fn list_sessions(store: &ConcreteSessionStore, json: bool) -> Result<()> {
    store.initialize().await?;
    store.flush().await;
    let index = store
        .index()
        .unwrap_or_else(|| ChatSessionsIndex::new(store.user_id()));

    if json {
        println!("{}", serde_json::to_string_pretty(&index)?);
        return Ok(());
    }

    let active = store.active_session_id();
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("").fg(Color::White),
        Cell::new("Character").fg(Color::White),
        Cell::new("Session").fg(Color::White),
        Cell::new("Title").fg(Color::White),
        Cell::new("Updated").fg(Color::White),
    ]);

    let mut count = 0usize;
    for (character_id, character) in &index.characters {
        for meta in character.sessions.values() {
            count += 1;
            let marker = if active.as_deref() == Some(meta.session_id.as_str()) {
                Cell::new("*").fg(Color::Green)
            } else {
                Cell::new("")
            };
            table.add_row(vec![
                marker,
                Cell::new(character_id).fg(Color::Cyan),
                Cell::new(&meta.session_id).fg(Color::DarkGrey),
                Cell::new(meta.title.as_deref().unwrap_or("-")),
                Cell::new(format_millis(meta.updated_at)),
            ]);
        }
    }

    println!();
    println!(
        "  Sessions for {}",
        style(&index.user_id).bold()
    );
    println!("{table}");
    println!();
    println!(
        "  {} session{}",
        style(count).bold(),
        if count == 1 { "" } else { "s" }
    );
    println!();
    Ok(())
}

pub async fn sync_sessions(store: &ConcreteSessionStore, json: bool) -> Result<()> {
    if !store.remote().is_authenticated() {
        anyhow::bail!("no remote configured: set client.remote_url and client.api_key in config.toml");
    }

    // Initialization pulls and hydrates from the server.
    store.initialize().await?;
    store.flush().await;

    let session_ids: Vec<String> = store
        .index()
        .map(|index| index.session_ids().map(str::to_string).collect())
        .unwrap_or_default();

    let mut pushed = 0usize;
    let mut failed = 0usize;
    for session_id in &session_ids {
        match store.sync_session_to_remote(session_id).await {
            Ok(true) => pushed += 1,
            Ok(false) => {}
            Err(e) => {
                failed += 1;
                tracing::warn!(session_id = %session_id, error = %e, "failed to push session");
            }
        }
    }

    if json {
        println!(
            "{}",
            serde_json::json!({"pushed": pushed, "failed": failed, "sessions": session_ids.len()})
        );
    } else {
        println!(
            "  {} Pushed {} of {} session{}",
            style("✓").green().bold(),
            style(pushed).bold(),
            session_ids.len(),
            if session_ids.len() == 1 { "" } else { "s" }
        );
        if failed > 0 {
            println!(
                "  {} {} failed (run with -v for details)",
                style("!").yellow().bold(),
                failed
            );
        }
    }
    Ok(())
}

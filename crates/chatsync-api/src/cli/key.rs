//! API key CLI commands: create, list, revoke.

use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use chatsync_types::error::RepositoryError;

use crate::state::AppState;

fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

pub async fn create_key(state: &AppState, user_id: &str, name: &str, json: bool) -> Result<()> {
    let key = state.api_keys.create_key(user_id, name).await?;

    if json {
        println!(
            "{}",
            serde_json::json!({"key": key, "userId": user_id, "name": name})
        );
        return Ok(());
    }

    println!();
    println!(
        "  {} API key for '{}' (save this -- it won't be shown again):",
        style("🔑").bold(),
        style(user_id).cyan()
    );
    println!();
    println!("  {}", style(&key).yellow().bold());
    println!();
    Ok(())
}

pub async fn list_keys(state: &AppState, json: bool) -> Result<()> {
    let keys = state.api_keys.list_keys().await?;

    if json {
        let rows: Vec<_> = keys
            .iter()
            .map(|key| {
                serde_json::json!({
                    "id": key.id,
                    "name": key.name,
                    "userId": key.user_id,
                    "createdAt": key.created_at,
                    "lastUsedAt": key.last_used_at,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!();
        println!(
            "  {} No API keys. Issue one with: {}",
            style("i").blue().bold(),
            style("chatsync key create <user-id>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Id").fg(Color::White),
        Cell::new("Name").fg(Color::White),
        Cell::new("User").fg(Color::White),
        Cell::new("Created").fg(Color::White),
        Cell::new("Last used").fg(Color::White),
    ]);

    for key in &keys {
        table.add_row(vec![
            Cell::new(&key.id).fg(Color::DarkGrey),
            Cell::new(&key.name),
            Cell::new(&key.user_id).fg(Color::Cyan),
            Cell::new(format_millis(key.created_at)),
            Cell::new(key.last_used_at.map(format_millis).unwrap_or_else(|| "never".into()))
                .fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

pub async fn revoke_key(state: &AppState, id: &str, json: bool) -> Result<()> {
    match state.api_keys.revoke_key(id).await {
        Ok(()) => {}
        Err(RepositoryError::NotFound) => anyhow::bail!("no API key with id '{id}'"),
        Err(e) => return Err(e.into()),
    }

    if json {
        println!("{}", serde_json::json!({"revoked": true, "id": id}));
    } else {
        println!("  {} Revoked key {}", style("✓").green().bold(), style(id).bold());
    }
    Ok(())
}

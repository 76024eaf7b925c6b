//! chatsync CLI and REST API entry point.
//!
//! Binary name: `chatsync`
//!
//! Parses CLI arguments, loads the data directory and config, then either
//! serves the sync API or runs a key/local command.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, KeyCommand, LocalCommand};
use state::{AppState, Environment, open_session_store};

fn init_tracing(cli: &Cli) {
    let default_filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,chatsync_core=debug,chatsync_infra=debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if cli.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    // Shell completions don't need the data directory
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "chatsync", &mut std::io::stdout());
        return Ok(());
    }

    let env = Environment::load().await?;
    tracing::debug!(data_dir = %env.data_dir.display(), "loaded environment");

    match cli.command {
        Commands::Serve { port, host } => {
            let state = AppState::init(&env).await?;
            serve(state, host, port, cli.quiet).await?;
        }

        Commands::Key { action } => {
            let state = AppState::init(&env).await?;
            match action {
                KeyCommand::Create { user_id, name } => {
                    cli::key::create_key(&state, &user_id, &name, cli.json).await?;
                }
                KeyCommand::List => cli::key::list_keys(&state, cli.json).await?,
                KeyCommand::Revoke { id } => cli::key::revoke_key(&state, &id, cli.json).await?,
            }
        }

        Commands::Local { action } => {
            let store = open_session_store(&env).await?;
            match action {
                LocalCommand::Export { file } => {
                    cli::local::export_sessions(&store, &file, cli.json).await?;
                }
                LocalCommand::Import { file } => {
                    cli::local::import_sessions(&store, &file, cli.json).await?;
                }
                LocalCommand::List => cli::local::list_sessions(&store, cli.json).await?,
                LocalCommand::Sync => cli::local::sync_sessions(&store, cli.json).await?,
            }
            store.flush().await;
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}

async fn serve(
    state: AppState,
    host: Option<String>,
    port: Option<u16>,
    quiet: bool,
) -> anyhow::Result<()> {
    if state.api_keys.list_keys().await?.is_empty() {
        tracing::warn!("no API keys issued; every request will be rejected");
        if !quiet {
            println!(
                "  {} No API keys yet. Issue one with: {}",
                console::style("!").yellow().bold(),
                console::style("chatsync key create <user-id>").yellow()
            );
        }
    }

    let host = host.unwrap_or_else(|| state.config.server.host.clone());
    let port = port.unwrap_or(state.config.server.port);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, data_dir = %state.data_dir.display(), "chatsync API listening");

    if !quiet {
        println!(
            "  {} chatsync API listening on {}",
            console::style("⚡").bold(),
            console::style(format!("http://{addr}")).cyan()
        );
        println!("  {}", console::style("Press Ctrl+C to stop").dim());
    }

    let router = http::router::build_router(state);
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if !quiet {
        println!("\n  Server stopped.");
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

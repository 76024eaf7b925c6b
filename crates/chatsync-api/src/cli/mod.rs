//! CLI command definitions for the `chatsync` binary.
//!
//! Uses clap derive macros. Server-side commands (`serve`, `key`) work on the
//! durable store; `local` drives the on-device session store.

pub mod key;
pub mod local;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Sync chat sessions between devices and a durable server.
#[derive(Parser)]
#[command(name = "chatsync", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API server.
    Serve {
        /// Port to listen on (overrides config).
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config).
        #[arg(long)]
        host: Option<String>,
    },

    /// Manage API keys (create, list, revoke).
    Key {
        #[command(subcommand)]
        action: KeyCommand,
    },

    /// Work with the local session cache.
    Local {
        #[command(subcommand)]
        action: LocalCommand,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[derive(Subcommand)]
pub enum KeyCommand {
    /// Issue a new key for a user. The key is printed once.
    Create {
        /// User id the key authenticates as.
        user_id: String,

        /// Label shown in `key list`.
        #[arg(long, default_value = "default")]
        name: String,
    },

    /// List issued keys.
    #[command(alias = "ls")]
    List,

    /// Revoke a key by id.
    #[command(alias = "rm")]
    Revoke {
        /// Key id from `key list`.
        id: String,
    },
}

#[derive(Subcommand)]
pub enum LocalCommand {
    /// Write every local session to a JSON file.
    Export {
        /// Destination file.
        file: PathBuf,
    },

    /// Replace local sessions with the contents of an export file.
    Import {
        /// Source file.
        file: PathBuf,
    },

    /// List local sessions grouped by character.
    #[command(alias = "ls")]
    List,

    /// Pull from the configured server, then push every local session.
    Sync,
}

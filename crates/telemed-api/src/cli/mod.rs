//! CLI command definitions and dispatch for the `tmed` binary.
//!
//! Uses clap derive macros for argument parsing. The binary is primarily an
//! API server (`tmed serve`); the remaining commands are operator helpers.

pub mod status;
pub mod token;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use uuid::Uuid;

/// Telemed consultation messaging backend.
#[derive(Parser)]
#[command(name = "tmed", version, about, long_about = None)]
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

    /// Bridge tracing spans to OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the REST API and WebSocket server.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value_t = 8080, env = "TELEMED_PORT")]
        port: u16,

        /// Host interface to bind.
        #[arg(long, default_value = "127.0.0.1", env = "TELEMED_HOST")]
        host: String,
    },

    /// Issue a short-lived WebSocket chat token for a user.
    #[command(name = "issue-token")]
    IssueToken {
        /// User to issue the token for.
        user_id: Uuid,

        /// Token lifetime in seconds (defaults to the configured TTL).
        #[arg(long)]
        ttl_secs: Option<u64>,
    },

    /// Show database and configuration status.
    Status,

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

//! Command-line interface definition for consultd
//!
//! This module defines the CLI structure using clap's derive API,
//! providing the operator surface: the serve loop, one-shot sweeps, and
//! session inspection.

use clap::{Parser, Subcommand};

/// consultd - Consultation matching and session lifecycle engine
///
/// Pairs clients with advisors for live consultations and keeps the
/// session records honest: idempotent requests, buffered pre-accept
/// messages, and deadline expiry with a periodic safety sweep.
#[derive(Parser, Debug, Clone)]
#[command(name = "consultd")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/consultd.yaml")]
    pub config: Option<String>,

    /// Override the session database path
    #[arg(long)]
    pub db_path: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for consultd
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the engine: periodic expiry sweep until interrupted
    Serve,

    /// Run a single expiry sweep pass and exit
    Sweep,

    /// Inspect stored sessions
    Sessions {
        /// Session inspection subcommand
        #[command(subcommand)]
        command: SessionCommand,
    },
}

/// Session inspection subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum SessionCommand {
    /// List the most recent sessions
    List {
        /// Maximum number of sessions to show
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/consultd.yaml".to_string()),
            db_path: None,
            command: Commands::Sweep,
        }
    }
}

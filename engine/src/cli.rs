//! CLI interface for Recap
//!
//! Commands and global flags, defined with clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const DEFAULT_QUESTION: &str = "What is the capital of France?";

/// Recap research agent
///
/// Answers a question through repeated research cycles. Each cycle searches
/// and reads the web, then condenses what it found into a summary that seeds
/// the next cycle.
#[derive(Parser, Debug)]
#[command(name = "recap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Research a question
    Run {
        /// The question to answer
        #[arg(default_value = DEFAULT_QUESTION)]
        question: String,

        /// Print only the final output instead of each new message
        #[arg(long)]
        non_streaming: bool,

        /// Abort the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout_secs: Option<u64>,
    },

    /// Show run history
    History {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show every cycle of a past run
    Replay {
        /// Run ID to replay
        run_id: String,
    },

    /// Manage API keys in the OS keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Check configuration and secret availability
    Doctor,
}

/// Secret management actions
#[derive(Subcommand, Debug)]
pub enum SecretAction {
    /// Store a secret
    Set {
        /// Secret name (e.g. openai_api_key)
        name: String,
        /// Secret value; read from stdin when omitted
        value: Option<String>,
    },

    /// Remove a secret
    Delete {
        /// Secret name
        name: String,
    },

    /// Show where a secret would be read from
    Status {
        /// Secret name
        name: String,
    },
}

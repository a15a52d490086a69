use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Exam Round Timer Guard
///
/// Keeps a per-round countdown that survives restarts, flags naive clock
/// tampering, and fires a single expiry signal for auto-submission.
#[derive(Parser, Debug)]
#[command(name = "round-guard")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write an example configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Start (or resume) the countdown for a session
    Start {
        /// Session key, e.g. "user1_round42"
        #[arg(long)]
        key: String,

        /// Round duration in seconds, as granted by the contest server
        #[arg(long)]
        duration_secs: u64,
    },
    /// Show remaining time for a session
    Status {
        /// Session key
        #[arg(long)]
        key: String,

        /// Round duration in seconds, as granted by the contest server
        #[arg(long)]
        duration_secs: u64,
    },
    /// Run the countdown until it expires
    Watch {
        /// Session key
        #[arg(long)]
        key: String,

        /// Round duration in seconds, as granted by the contest server
        #[arg(long)]
        duration_secs: u64,
    },
    /// Clear persisted state after the round is submitted or abandoned
    Complete {
        /// Session key
        #[arg(long)]
        key: String,
    },
}

use anyhow::{Context, Result};
use clap::Parser;

mod cli;
mod commands;
mod config;
mod guard;

use cli::{Args, Commands};

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = commands::session::resolve_config(args.config.clone())?;

    match args.command {
        Commands::Init { force } => commands::session::init(args.config, force),
        Commands::Start { key, duration_secs } => {
            commands::session::start(&config, &key, duration_secs)
        }
        Commands::Status { key, duration_secs } => {
            commands::session::status(&config, &key, duration_secs)
        }
        Commands::Watch { key, duration_secs } => {
            let runtime =
                tokio::runtime::Runtime::new().context("failed to start async runtime")?;
            runtime.block_on(commands::session::watch(&config, &key, duration_secs))
        }
        Commands::Complete { key } => commands::session::complete(&config, &key),
    }
}

/// Initialize logging
fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let level = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();
}

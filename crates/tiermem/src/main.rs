//! tiermem - Tiered Memory Store CLI
//!
//! Stores, queries and maintains session memory entries in a local SQLite
//! database or JSON file tree.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tiermem_core::SessionMemory;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod cli;
mod commands;
mod config;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing (stderr, so --json output stays parseable)
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("tiermem=info".parse()?))
        .init();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("tiermem {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Load configuration
    let mut config = config::Config::load()?;
    config.apply_flags(cli.store, cli.backend);
    let store = Arc::new(config.open_store()?);
    let json = cli.json;

    // Execute command
    match cli.command {
        Commands::Put(args) => commands::entry::put(args, &store, json),
        Commands::Get { id, level } => commands::entry::get(&id, level, &store, json),
        Commands::Delete { id, level } => commands::entry::delete(&id, level, &store, json),
        Commands::Query(args) => commands::query::execute(args, &store, json),
        Commands::Sweep => commands::maintain::sweep(&store, json),
        Commands::Stats => commands::maintain::stats(&store, json),
        Commands::Index(cmd) => commands::maintain::index(cmd, &store, json),
        Commands::Context(cmd) => commands::session::context(cmd, &SessionMemory::new(store), json),
        Commands::Pattern(cmd) => commands::session::pattern(cmd, &SessionMemory::new(store), json),
        Commands::Handoff(cmd) => commands::session::handoff(cmd, &SessionMemory::new(store), json),
        Commands::Watch { interval } => commands::watch::execute(interval, store).await,
        Commands::Version => Ok(()),
    }
}

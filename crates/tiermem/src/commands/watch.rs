//! Watch command: run the expiry sweeper in the foreground.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use tiermem_core::{Sweeper, TieredStore};

/// Sweep interval when neither the flag nor the config sets one
const DEFAULT_INTERVAL_SECS: u64 = 300;

pub async fn execute(interval: Option<u64>, store: Arc<TieredStore>) -> Result<()> {
    let secs = interval
        .or(store.config().sweep_interval_secs)
        .unwrap_or(DEFAULT_INTERVAL_SECS);
    if secs == 0 {
        bail!("--interval must be greater than 0");
    }

    println!(
        "{} Sweeping {} store every {}s (Ctrl-C to stop)",
        "●".cyan(),
        store.backend_name(),
        secs
    );

    let handle = Sweeper::spawn(store, Duration::from_secs(secs));
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    let removed = handle.shutdown().await;
    println!("{} Stopped, {} expired entries removed", "✓".green(), removed);
    Ok(())
}

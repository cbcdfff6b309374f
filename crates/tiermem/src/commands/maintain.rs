//! Maintenance commands: sweep, stats, index rebuild / verify.

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde_json::json;
use tiermem_core::{IndexKind, MemoryLevel, TieredStore};

use super::print_json;
use crate::cli::{IndexAction, IndexCommand};

/// Remove all expired entries.
pub fn sweep(store: &TieredStore, json: bool) -> Result<()> {
    let removed = store.sweep().context("Sweep failed")?;

    if json {
        return print_json(&json!({ "removed": removed }));
    }
    println!("{} Cleaned up {} expired entries", "✓".green(), removed);
    Ok(())
}

/// Show record and index counts.
pub fn stats(store: &TieredStore, json: bool) -> Result<()> {
    let stats = store.stats().context("Failed to get store stats")?;

    if json {
        return print_json(&stats);
    }

    println!("{} Memory Statistics ({})", "📊".cyan(), stats.backend);
    println!();
    println!("  Total memories: {}", stats.total_records().to_string().bold());
    println!();
    println!("  By level:");
    for level in MemoryLevel::ALL {
        let count = stats.records.get(&level).copied().unwrap_or(0);
        println!("    {:<10} {}", format!("{level}:"), count.to_string().cyan());
    }
    println!();
    println!("  Index keys:");
    for kind in IndexKind::ALL {
        let count = stats.index_keys.get(&kind).copied().unwrap_or(0);
        println!("    {:<10} {}", format!("{kind}:"), count.to_string().green());
    }
    println!("  Indexed ids: {}", stats.indexed_ids);
    Ok(())
}

/// Index maintenance.
pub fn index(cmd: IndexCommand, store: &TieredStore, json: bool) -> Result<()> {
    match cmd.action {
        IndexAction::Rebuild => rebuild(store, json),
        IndexAction::Verify => verify(store, json),
    }
}

fn rebuild(store: &TieredStore, json: bool) -> Result<()> {
    let rebuilt = store.rebuild_indices().context("Index rebuild failed")?;

    if json {
        return print_json(&json!({
            "indexed_ids": rebuilt.ids().len(),
            "keys": rebuilt.key_counts(),
        }));
    }

    println!("{} Rebuilt indices", "✓".green());
    println!("  Indexed ids: {}", rebuilt.ids().len());
    for (kind, keys) in rebuilt.key_counts() {
        println!("  {kind}: {keys} keys");
    }
    Ok(())
}

fn verify(store: &TieredStore, json: bool) -> Result<()> {
    let report = store.verify_indices().context("Index verification failed")?;

    if json {
        print_json(&report)?;
    } else if report.is_consistent() {
        println!(
            "{} Indices consistent ({} live of {} scanned records)",
            "✓".green(),
            report.live,
            report.scanned
        );
    } else {
        println!(
            "{} Indices inconsistent: {} dangling, {} missing references",
            "✗".red(),
            report.diff.dangling.len(),
            report.diff.missing.len()
        );
        for r in &report.diff.dangling {
            println!("  {} {}[{}] -> {}", "-".red(), r.kind, r.key, r.id);
        }
        for r in &report.diff.missing {
            println!("  {} {}[{}] -> {}", "+".green(), r.kind, r.key, r.id);
        }
        println!();
        println!("  Run {} to repair", "tiermem index rebuild".cyan());
    }

    if !report.is_consistent() {
        bail!("index verification found {} differences", report.diff.dangling.len() + report.diff.missing.len());
    }
    Ok(())
}

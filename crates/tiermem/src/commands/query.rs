//! Query command.

use anyhow::{Context, Result, anyhow};
use colored::Colorize;
use tiermem_core::time::parse_timestamp;
use tiermem_core::{MemoryQuery, TieredStore};

use super::{print_entry, print_json};
use crate::cli::QueryArgs;

pub fn execute(args: QueryArgs, store: &TieredStore, json: bool) -> Result<()> {
    let mut query = MemoryQuery::new()
        .with_tags(args.tags)
        .with_wildcard(!args.no_wildcard);
    if let Some(session) = args.session {
        query = query.with_session(session);
    }
    if let Some(level) = args.level {
        query = query.with_level(level);
    }
    if let Some(since) = args.since.as_deref() {
        let since = parse_timestamp(since).ok_or_else(|| anyhow!("Invalid --since timestamp: {since}"))?;
        query = query.with_since(since);
    }

    let result = store.query(&query).context("Query failed")?;

    if json {
        return print_json(&result);
    }

    if result.is_empty() {
        println!("{} No memories found matching criteria", "⚠".yellow());
        return Ok(());
    }

    println!("{} Found {} memories:", "✓".green(), result.len());
    if result.partial {
        println!(
            "  {}",
            format!(
                "(most recent {} per level only; filter by session or tag for a complete result)",
                store.config().recency_limit
            )
            .dimmed()
        );
    }
    println!();

    for entry in &result.entries {
        print_entry(entry);
    }
    Ok(())
}

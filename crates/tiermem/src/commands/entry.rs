//! Entry commands: put, get, delete.

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde_json::{Value, json};
use tiermem_core::entry::TAGS_KEY;
use tiermem_core::{MemoryLevel, TieredStore};

use super::{parse_object, print_entry, print_json};
use crate::cli::PutArgs;

/// Store a new entry.
pub fn put(args: PutArgs, store: &TieredStore, json: bool) -> Result<()> {
    let source = args.source.to_source()?;
    let mut payload = parse_object(&args.data, "--data")?;

    if !args.tags.is_empty() {
        let mut tags: Vec<Value> = match payload.remove(TAGS_KEY) {
            Some(Value::Array(existing)) => existing,
            Some(other) => bail!("payload \"tags\" must be an array, got {other}"),
            None => Vec::new(),
        };
        tags.extend(args.tags.iter().map(|t| json!(t)));
        payload.insert(TAGS_KEY.into(), Value::Array(tags));
    }

    let mut entry = store.new_entry(args.level, source, payload, args.ttl);
    if let Some(visibility) = args.visibility {
        entry.set_visibility(visibility);
    }
    store.put(&entry).context("Failed to store entry")?;

    if json {
        return print_json(&entry);
    }

    println!("{} Stored in {} memory", "✓".green(), entry.level().to_string().cyan());
    println!("  ID: {}", entry.id());
    if let Some(ttl) = entry.ttl_seconds() {
        println!("  TTL: {} seconds", ttl);
    }
    let tags = entry.tags();
    if !tags.is_empty() {
        println!("  Tags: {}", tags.join(", "));
    }
    Ok(())
}

/// Show an entry.
pub fn get(id: &str, level: Option<MemoryLevel>, store: &TieredStore, json: bool) -> Result<()> {
    let entry = match level {
        Some(level) => store.get(level, id),
        None => store.find(id),
    }
    .context("Failed to read entry")?;

    match (entry, json) {
        (Some(entry), true) => print_json(&entry),
        (None, true) => print_json(&Value::Null),
        (Some(entry), false) => {
            print_entry(&entry);
            Ok(())
        }
        (None, false) => {
            println!("{} Memory not found: {}", "⚠".yellow(), id);
            Ok(())
        }
    }
}

/// Delete an entry.
pub fn delete(id: &str, level: Option<MemoryLevel>, store: &TieredStore, json: bool) -> Result<()> {
    let levels = match level {
        Some(level) => vec![level],
        None => MemoryLevel::ALL.to_vec(),
    };

    let mut deleted_from = None;
    for level in levels {
        if store.delete(level, id).context("Failed to delete entry")? {
            deleted_from = Some(level);
            break;
        }
    }

    if json {
        return print_json(&json!({ "id": id, "deleted": deleted_from.is_some(), "level": deleted_from }));
    }

    match deleted_from {
        Some(level) => println!("{} Deleted {} memory: {}", "✓".green(), level.to_string().cyan(), id),
        None => println!("{} Memory not found: {}", "⚠".yellow(), id),
    }
    Ok(())
}

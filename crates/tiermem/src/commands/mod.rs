//! Command implementations for tiermem CLI.
//!
//! Each submodule implements the logic for a command group.

pub mod entry;
pub mod maintain;
pub mod query;
pub mod session;
pub mod watch;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use tiermem_core::time::format_timestamp;
use tiermem_core::{MemoryEntry, MemorySource, Payload};

use crate::cli::SourceArgs;

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to encode output")?);
    Ok(())
}

/// Parse a JSON command line argument.
pub fn parse_json(arg: &str, what: &str) -> Result<Value> {
    serde_json::from_str(arg).with_context(|| format!("{what} must be valid JSON"))
}

/// Parse a JSON object argument.
pub fn parse_object(arg: &str, what: &str) -> Result<Payload> {
    match parse_json(arg, what)? {
        Value::Object(map) => Ok(map),
        other => bail!("{what} must be a JSON object, got {other}"),
    }
}

/// Parse a JSON argument, keeping plain text as a string.
pub fn parse_value(arg: &str) -> Value {
    serde_json::from_str(arg).unwrap_or_else(|_| Value::String(arg.to_string()))
}

impl SourceArgs {
    pub fn to_source(&self) -> Result<MemorySource> {
        let mut source = MemorySource::new(self.source_type, &self.source_id);
        if let Some(session) = &self.session {
            source = source.with_session(session);
        }
        source.validate().context("Invalid source")?;
        Ok(source)
    }
}

/// Print one entry in human-readable form.
pub fn print_entry(entry: &MemoryEntry) {
    println!("{} {}", "●".cyan(), entry.id().bold());
    println!(
        "  Level: {}  Source: {}",
        entry.level().to_string().cyan(),
        entry.source().key()
    );
    if let Some(session) = entry.session() {
        println!("  Session: {}", session);
    }
    println!("  Created: {}", format_timestamp(&entry.created_at()).dimmed());
    match entry.expires_at() {
        Some(expires_at) => println!("  Expires: {}", format_timestamp(&expires_at).dimmed()),
        None => println!("  Expires: {}", "never".dimmed()),
    }
    let tags = entry.tags();
    if !tags.is_empty() {
        println!("  Tags: {}", tags.join(", ").yellow());
    }
    if entry.visibility() != tiermem_core::entry::DEFAULT_VISIBILITY {
        println!("  Visibility: {}", entry.visibility());
    }
    if !entry.payload().is_empty() {
        let data = Value::Object(entry.payload().clone());
        println!("  Data: {}", data);
    }
    println!();
}

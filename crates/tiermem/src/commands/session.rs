//! Session commands: context, pattern, handoff.

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use tiermem_core::time::format_timestamp;
use tiermem_core::{MemorySource, SessionMemory};

use super::{parse_json, parse_value, print_json};
use crate::cli::{ContextAction, ContextCommand, HandoffAction, HandoffCommand, PatternAction, PatternCommand};

/// Execute context command.
pub fn context(cmd: ContextCommand, memory: &SessionMemory, json: bool) -> Result<()> {
    match cmd.action {
        ContextAction::Create {
            session,
            source_type,
            source_id,
            focus,
        } => {
            let source = MemorySource::new(source_type, source_id);
            let focus = parse_json(&focus, "--focus")?;
            let id = memory
                .create_context(&session, source, focus)
                .context("Failed to create context")?;

            if json {
                return print_json(&json!({ "id": id, "session_id": session }));
            }
            println!("{} Created context for session {}", "✓".green(), session.cyan());
            println!("  ID: {}", id);
            Ok(())
        }

        ContextAction::Focus { session, focus } => {
            let focus = parse_json(&focus, "focus")?;
            let entry = memory
                .update_focus(&session, focus)
                .with_context(|| format!("Failed to update focus for session {session}"))?;

            if json {
                return print_json(&entry);
            }
            println!("{} Updated focus for session {}", "✓".green(), session.cyan());
            println!("  Context: {}", entry.id());
            Ok(())
        }

        ContextAction::Add { session, key, value } => {
            let entry = memory
                .add_to_working_set(&session, &key, parse_value(&value))
                .with_context(|| format!("Failed to update working set for session {session}"))?;

            if json {
                return print_json(&entry);
            }
            println!("{} Added {} to working set of session {}", "✓".green(), key.bold(), session.cyan());
            Ok(())
        }

        ContextAction::Load { session } => {
            let package = memory
                .load_context(&session)
                .with_context(|| format!("Failed to load context for session {session}"))?;

            if json {
                return print_json(&package);
            }

            let Some(package) = package else {
                println!("{} No context found for session {}", "⚠".yellow(), session);
                return Ok(());
            };

            println!("{} Session {}", "●".cyan(), package.session_id.bold());
            println!("  Context: {}", package.context_id);
            println!("  Focus: {}", package.current_focus);
            if package.working_set.is_empty() {
                println!("  Working set: {}", "empty".dimmed());
            } else {
                println!("  Working set:");
                for (key, value) in &package.working_set {
                    println!("    {}: {}", key, value);
                }
            }
            if !package.patterns.is_empty() {
                println!("  Patterns:");
                for pattern in &package.patterns {
                    println!("    - {}", pattern);
                }
            }
            println!(
                "  Last updated: {}  Entries: {}",
                format_timestamp(&package.last_updated).dimmed(),
                package.entry_count
            );
            Ok(())
        }
    }
}

/// Execute pattern command.
pub fn pattern(cmd: PatternCommand, memory: &SessionMemory, json: bool) -> Result<()> {
    match cmd.action {
        PatternAction::Save { source, pattern, tags } => {
            let source = source.to_source()?;
            let pattern = parse_json(&pattern, "pattern")?;
            let id = memory
                .save_pattern(source, pattern, &tags)
                .context("Failed to save pattern")?;

            if json {
                return print_json(&json!({ "id": id }));
            }
            println!("{} Saved pattern to {} memory", "✓".green(), "working".cyan());
            println!("  ID: {}", id);
            Ok(())
        }
    }
}

/// Execute handoff command.
pub fn handoff(cmd: HandoffCommand, memory: &SessionMemory, json: bool) -> Result<()> {
    match cmd.action {
        HandoffAction::Create {
            source,
            to,
            instructions,
            context,
        } => {
            let source = source.to_source()?;
            let context = parse_json(&context, "--context")?;
            let id = memory
                .create_handoff(source, to, context, &instructions)
                .context("Failed to create handoff")?;

            if json {
                return print_json(&json!({ "id": id }));
            }
            println!("{} Created handoff for {}", "✓".green(), to.to_string().cyan());
            println!("  ID: {}", id);
            Ok(())
        }
    }
}

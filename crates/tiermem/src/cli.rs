//! CLI argument definitions using clap derive macros.
//!
//! Command structure for the tiered memory store.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tiermem_core::{BackendKind, MemoryLevel, SourceType};

/// Tiered Memory Store CLI
///
/// Store, query and maintain session memory entries.
#[derive(Parser, Debug)]
#[command(name = "tiermem")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Store location (SQLite file or file-store directory)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Storage backend (sqlite or file)
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a new entry
    Put(PutArgs),

    /// Show an entry by id
    Get {
        /// Entry ID
        id: String,

        /// Level to read (searches all levels when omitted)
        #[arg(short, long)]
        level: Option<MemoryLevel>,
    },

    /// Delete an entry
    Delete {
        /// Entry ID
        id: String,

        /// Level holding the entry (searches all levels when omitted)
        #[arg(short, long)]
        level: Option<MemoryLevel>,
    },

    /// Query entries by session, tags or recency
    Query(QueryArgs),

    /// Remove all expired entries
    Sweep,

    /// Show record and index counts
    Stats,

    /// Index maintenance (rebuild, verify)
    Index(IndexCommand),

    /// Session context (create, focus, add, load)
    Context(ContextCommand),

    /// Discovered patterns
    Pattern(PatternCommand),

    /// Handoffs between producers
    Handoff(HandoffCommand),

    /// Run the periodic expiry sweeper until Ctrl-C
    Watch {
        /// Sweep interval in seconds (defaults to the configured interval)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show version
    Version,
}

/// Producer identity shared by the writing commands
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Producer type (chat, agent, function, api)
    #[arg(long = "source-type", default_value = "chat")]
    pub source_type: SourceType,

    /// Producer ID
    #[arg(long = "source-id")]
    pub source_id: String,

    /// Session the entry belongs to
    #[arg(short, long)]
    pub session: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct PutArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Level (immediate, working, longterm)
    #[arg(short, long, default_value = "immediate")]
    pub level: MemoryLevel,

    /// Payload as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub data: String,

    /// Tags (repeatable, merged into the payload)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Time-to-live in seconds (defaults to the level's retention)
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Visibility tag
    #[arg(long)]
    pub visibility: Option<String>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Session ID (takes precedence over tags)
    #[arg(short, long)]
    pub session: Option<String>,

    /// Tags (repeatable; `*`, `?` and `[...]` match as globs)
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    /// Only entries at this level
    #[arg(short, long)]
    pub level: Option<MemoryLevel>,

    /// Only entries created after this RFC 3339 timestamp
    #[arg(long)]
    pub since: Option<String>,

    /// Match tags literally
    #[arg(long)]
    pub no_wildcard: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Index Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct IndexCommand {
    #[command(subcommand)]
    pub action: IndexAction,
}

#[derive(Subcommand, Debug)]
pub enum IndexAction {
    /// Rebuild all indices from a full scan
    Rebuild,

    /// Compare indices with a full scan without modifying anything
    Verify,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ContextCommand {
    #[command(subcommand)]
    pub action: ContextAction,
}

#[derive(Subcommand, Debug)]
pub enum ContextAction {
    /// Start a context for a session
    Create {
        /// Session ID
        session: String,

        /// Producer type
        #[arg(long = "source-type", default_value = "chat")]
        source_type: SourceType,

        /// Producer ID
        #[arg(long = "source-id")]
        source_id: String,

        /// Initial focus as JSON
        #[arg(short, long, default_value = "{}")]
        focus: String,
    },

    /// Replace the current focus
    Focus {
        /// Session ID
        session: String,

        /// New focus as JSON
        focus: String,
    },

    /// Add an item to the working set
    Add {
        /// Session ID
        session: String,

        /// Working set key
        key: String,

        /// Value as JSON (plain text is stored as a string)
        value: String,
    },

    /// Show the session's context package
    Load {
        /// Session ID
        session: String,
    },
}

#[derive(Args, Debug)]
pub struct PatternCommand {
    #[command(subcommand)]
    pub action: PatternAction,
}

#[derive(Subcommand, Debug)]
pub enum PatternAction {
    /// Save a discovered pattern to working memory
    Save {
        #[command(flatten)]
        source: SourceArgs,

        /// Pattern as JSON
        pattern: String,

        /// Tags (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
}

#[derive(Args, Debug)]
pub struct HandoffCommand {
    #[command(subcommand)]
    pub action: HandoffAction,
}

#[derive(Subcommand, Debug)]
pub enum HandoffAction {
    /// Package context for another producer type
    Create {
        #[command(flatten)]
        source: SourceArgs,

        /// Receiving producer type
        #[arg(long)]
        to: SourceType,

        /// Instructions for the receiver
        #[arg(short, long)]
        instructions: String,

        /// Context as JSON
        #[arg(short, long, default_value = "{}")]
        context: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_put_parses_typed_arguments() {
        let cli = Cli::try_parse_from([
            "tiermem", "--json", "put", "--source-type", "agent", "--source-id", "a1", "-s", "S1", "-l", "working",
            "-t", "A", "-t", "B", "--ttl", "60",
        ])
        .unwrap();

        assert!(cli.json);
        let Commands::Put(args) = cli.command else {
            panic!("expected put");
        };
        assert_eq!(args.source.source_type, SourceType::Agent);
        assert_eq!(args.source.session.as_deref(), Some("S1"));
        assert_eq!(args.level, MemoryLevel::Working);
        assert_eq!(args.tags, vec!["A", "B"]);
        assert_eq!(args.ttl, Some(60));
        assert_eq!(args.data, "{}");
    }

    #[test]
    fn test_unknown_level_rejected() {
        let result = Cli::try_parse_from(["tiermem", "get", "abc", "--level", "forever"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_store_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tiermem", "stats", "--backend", "file", "--store", "/tmp/mem"]).unwrap();
        assert_eq!(cli.backend, Some(BackendKind::File));
        assert_eq!(cli.store, Some(PathBuf::from("/tmp/mem")));
    }
}

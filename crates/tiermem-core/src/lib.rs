//! tiermem-core - Tiered memory store
//!
//! Persistent, structured memory for cooperating producers (chat sessions,
//! agents, functions, API clients). Entries live in one of three levels and
//! carry an optional time-to-live:
//!
//! - **entry**: Entry, source and level types, the persisted document format
//! - **store**: `TieredStore` (put, get, delete, lazy expiration, sweep)
//! - **index**: Session, tag and source indices with rebuild and verification
//! - **query**: Session / tag / recency queries
//! - **session**: Context, pattern and handoff helpers
//! - **sweeper**: Periodic expiry on a tokio task
//! - **backend**: SQLite and JSON file storage
//!
//! # Example
//!
//! ```rust,no_run
//! use tiermem_core::{MemoryLevel, MemoryQuery, MemorySource, Payload, SourceType, StoreConfig, TieredStore};
//!
//! fn example() -> tiermem_core::Result<()> {
//!     let store = TieredStore::open(StoreConfig::sqlite("memory.db"))?;
//!
//!     let source = MemorySource::new(SourceType::Chat, "claude-001").with_session("S1");
//!     let entry = store.create(MemoryLevel::Working, source, Payload::new(), None)?;
//!
//!     let found = store.query(&MemoryQuery::session("S1"))?;
//!     assert_eq!(found.entries[0].id(), entry.id());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod index;
pub mod query;
pub mod session;
pub mod store;
pub mod sweeper;
pub mod time;

// Re-export commonly used types
pub use backend::StorageBackend;
pub use config::{BackendKind, ConfigValidationError, RetentionConfig, StoreConfig};
pub use entry::{MemoryEntry, MemoryLevel, MemorySource, Payload, SourceType};
pub use error::{Error, Result};
pub use index::{IndexDiff, IndexKind, IndexRef, IndexSet};
pub use query::{MemoryQuery, QueryResult};
pub use session::{ContextPackage, SessionMemory};
pub use store::{IndexReport, StoreStats, TieredStore};
pub use sweeper::{Sweeper, SweeperHandle};

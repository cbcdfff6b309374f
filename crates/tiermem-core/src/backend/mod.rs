//! Storage backends.
//!
//! A backend provides one record namespace per [`MemoryLevel`] plus one
//! namespace for the three indices. It knows nothing about expiry or index
//! consistency; [`crate::store::TieredStore`] drives both.

use crate::entry::{MemoryEntry, MemoryLevel};
use crate::error::Result;
use crate::index::{Index, IndexKind};

mod file;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use file::FileBackend;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteBackend;

/// Exclusive hold on the medium, released when dropped.
///
/// Writes made while the hold is active are kept only if [`MediumLock::commit`]
/// succeeds on media that support rollback.
pub trait MediumLock {
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Persistence medium for records and indices.
///
/// Implementations serialise their own access to the medium and must be safe
/// to share across threads.
pub trait StorageBackend: Send + Sync {
    /// Short name for logs (`"sqlite"`, `"file"`).
    fn name(&self) -> &'static str;

    /// Create the level and index namespaces if missing.
    fn init(&self) -> Result<()>;

    /// Write the full record under `(entry.level, entry.id)`, replacing any previous one.
    fn write_record(&self, entry: &MemoryEntry) -> Result<()>;

    /// Read the record at `(level, id)`.
    fn read_record(&self, level: MemoryLevel, id: &str) -> Result<Option<MemoryEntry>>;

    /// Remove the record at `(level, id)`. Returns whether one existed.
    fn remove_record(&self, level: MemoryLevel, id: &str) -> Result<bool>;

    /// All record ids in a level.
    fn list_ids(&self, level: MemoryLevel) -> Result<Vec<String>>;

    /// Up to `limit` record ids in a level, most recently written first.
    fn recent_ids(&self, level: MemoryLevel, limit: usize) -> Result<Vec<String>>;

    /// Load one index. A missing index is empty.
    fn load_index(&self, kind: IndexKind) -> Result<Index>;

    /// Replace one index.
    fn save_index(&self, kind: IndexKind, index: &Index) -> Result<()>;

    /// Block until no other handle, in this or another process, holds the medium.
    fn lock_exclusive(&self) -> Result<Box<dyn MediumLock + '_>>;
}

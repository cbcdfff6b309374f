//! SQLite storage backend.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, warn};

use super::{MediumLock, StorageBackend};
use crate::entry::{MemoryEntry, MemoryLevel};
use crate::error::{Error, Result};
use crate::index::{Index, IndexKind};

/// Store schema SQL (001)
pub const TIERED_STORE_SQL: &str = include_str!("migrations/001_tiered_store.sql");

/// SQLite-backed record and index storage.
///
/// Thread-safe via internal Mutex. All database operations acquire the lock.
/// Transactions additionally hold `txn` so handles sharing this backend never
/// nest them on the one connection.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    txn: Mutex<()>,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        debug!("Opened SQLite store at {}", path.display());
        Ok(Self::from_connection(conn))
    }

    /// Private in-memory database (tests, scratch stores).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            txn: Mutex::new(()),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| Error::LockPoisoned)
    }
}

/// `BEGIN IMMEDIATE` transaction, rolled back unless committed.
struct SqliteTransaction<'a> {
    backend: &'a SqliteBackend,
    finished: bool,
    _txn: MutexGuard<'a, ()>,
}

impl MediumLock for SqliteTransaction<'_> {
    fn commit(mut self: Box<Self>) -> Result<()> {
        self.backend.conn()?.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.backend.conn() {
            Ok(conn) => {
                if let Err(e) = conn.execute_batch("ROLLBACK") {
                    warn!("Failed to roll back store transaction: {e}");
                }
            }
            Err(e) => warn!("Failed to roll back store transaction: {e}"),
        }
    }
}

impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn init(&self) -> Result<()> {
        self.conn()?.execute_batch(TIERED_STORE_SQL)?;
        Ok(())
    }

    fn write_record(&self, entry: &MemoryEntry) -> Result<()> {
        let document = entry.to_document()?;
        let conn = self.conn()?;
        // REPLACE assigns a fresh rowid, which breaks recency ties in write order.
        conn.execute(
            "INSERT OR REPLACE INTO memory_records (level, id, document, modified_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                entry.level().as_str(),
                entry.id(),
                document,
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn read_record(&self, level: MemoryLevel, id: &str) -> Result<Option<MemoryEntry>> {
        let document: Option<String> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT document FROM memory_records WHERE level = ?1 AND id = ?2",
                params![level.as_str(), id],
                |row| row.get(0),
            )
            .optional()?
        };
        document.as_deref().map(MemoryEntry::from_document).transpose()
    }

    fn remove_record(&self, level: MemoryLevel, id: &str) -> Result<bool> {
        let removed = self.conn()?.execute(
            "DELETE FROM memory_records WHERE level = ?1 AND id = ?2",
            params![level.as_str(), id],
        )?;
        Ok(removed > 0)
    }

    fn list_ids(&self, level: MemoryLevel) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM memory_records WHERE level = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![level.as_str()], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn recent_ids(&self, level: MemoryLevel, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM memory_records WHERE level = ?1
             ORDER BY modified_at DESC, rowid DESC LIMIT ?2",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let ids = stmt
            .query_map(params![level.as_str(), limit], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn load_index(&self, kind: IndexKind) -> Result<Index> {
        let document: Option<String> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT document FROM memory_indices WHERE kind = ?1",
                params![kind.as_str()],
                |row| row.get(0),
            )
            .optional()?
        };
        match document {
            Some(document) => Ok(serde_json::from_str(&document)?),
            None => Ok(Index::new()),
        }
    }

    fn save_index(&self, kind: IndexKind, index: &Index) -> Result<()> {
        let document = serde_json::to_string(index)?;
        self.conn()?.execute(
            "INSERT OR REPLACE INTO memory_indices (kind, document) VALUES (?1, ?2)",
            params![kind.as_str(), document],
        )?;
        Ok(())
    }

    fn lock_exclusive(&self) -> Result<Box<dyn MediumLock + '_>> {
        let txn = self.txn.lock().map_err(|_| Error::LockPoisoned)?;
        self.conn()?.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            backend: self,
            finished: false,
            _txn: txn,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{MemorySource, Payload, SourceType};

    fn backend() -> SqliteBackend {
        let backend = SqliteBackend::open_in_memory().unwrap();
        backend.init().unwrap();
        backend
    }

    fn entry(level: MemoryLevel) -> MemoryEntry {
        MemoryEntry::new(MemorySource::new(SourceType::Agent, "a1"), level, Payload::new())
    }

    #[test]
    fn test_init_is_repeatable() {
        let backend = backend();
        backend.init().unwrap();
    }

    #[test]
    fn test_record_roundtrip_and_partitioning() {
        let backend = backend();
        let e = entry(MemoryLevel::Working);
        backend.write_record(&e).unwrap();

        assert_eq!(backend.read_record(MemoryLevel::Working, e.id()).unwrap(), Some(e.clone()));
        assert_eq!(backend.read_record(MemoryLevel::Immediate, e.id()).unwrap(), None);
        assert_eq!(backend.list_ids(MemoryLevel::Working).unwrap(), vec![e.id().to_string()]);

        assert!(backend.remove_record(MemoryLevel::Working, e.id()).unwrap());
        assert!(!backend.remove_record(MemoryLevel::Working, e.id()).unwrap());
    }

    #[test]
    fn test_recent_ids_newest_first() {
        let backend = backend();
        let entries: Vec<_> = (0..5).map(|_| entry(MemoryLevel::Immediate)).collect();
        for e in &entries {
            backend.write_record(e).unwrap();
        }
        // Rewriting moves an entry to the front
        backend.write_record(&entries[0]).unwrap();

        let recent = backend.recent_ids(MemoryLevel::Immediate, 3).unwrap();
        assert_eq!(recent, vec![entries[0].id(), entries[4].id(), entries[3].id()]);
    }

    #[test]
    fn test_index_roundtrip() {
        let backend = backend();
        assert!(backend.load_index(IndexKind::Tags).unwrap().is_empty());

        let mut index = Index::new();
        index.insert("PATTERN".into(), vec!["a".into(), "b".into()]);
        backend.save_index(IndexKind::Tags, &index).unwrap();

        assert_eq!(backend.load_index(IndexKind::Tags).unwrap(), index);
        assert!(backend.load_index(IndexKind::Sessions).unwrap().is_empty());
    }

    #[test]
    fn test_uncommitted_writes_roll_back() {
        let backend = backend();
        let kept = entry(MemoryLevel::Working);
        let dropped = entry(MemoryLevel::Working);

        let lock = backend.lock_exclusive().unwrap();
        backend.write_record(&kept).unwrap();
        lock.commit().unwrap();

        let lock = backend.lock_exclusive().unwrap();
        backend.write_record(&dropped).unwrap();
        drop(lock);

        assert!(backend.read_record(MemoryLevel::Working, kept.id()).unwrap().is_some());
        assert_eq!(backend.read_record(MemoryLevel::Working, dropped.id()).unwrap(), None);
    }

    #[test]
    fn test_second_connection_sees_only_committed_writes() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("store.db");
        let first = SqliteBackend::open(&path).unwrap();
        first.init().unwrap();
        let second = SqliteBackend::open(&path).unwrap();

        let lock = first.lock_exclusive().unwrap();
        let e = entry(MemoryLevel::Immediate);
        first.write_record(&e).unwrap();
        assert_eq!(second.read_record(MemoryLevel::Immediate, e.id()).unwrap(), None);
        lock.commit().unwrap();

        assert_eq!(second.read_record(MemoryLevel::Immediate, e.id()).unwrap(), Some(e));
    }
}

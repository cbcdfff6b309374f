//! Tiered Store
//!
//! Entry persistence across the three levels, index maintenance and lazy
//! expiration. The store is constructed explicitly and shared as
//! `Arc<TieredStore>`.
//!
//! Every mutation (record write or removal plus the update of all three
//! indices) runs under this handle's lock and the medium's exclusive lock, and
//! starts from the indices as persisted at that moment, so several handles on
//! one medium, in one process or many, never overwrite each other's entries.
//! Record reads take no lock; when a read finds an expired record the deletion
//! takes both locks and re-reads first, so a concurrent rewrite with a fresh
//! TTL wins.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backend::{FileBackend, StorageBackend};
use crate::config::{BackendKind, StoreConfig};
use crate::entry::{MemoryEntry, MemoryLevel, MemorySource, Payload};
use crate::error::{Error, Result};
use crate::index::{IndexDiff, IndexKeys, IndexKind, IndexSet};
use crate::time::now_utc;

/// Record and index counts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub backend: &'static str,
    pub records: BTreeMap<MemoryLevel, usize>,
    pub index_keys: BTreeMap<IndexKind, usize>,
    pub indexed_ids: usize,
}

impl StoreStats {
    pub fn total_records(&self) -> usize {
        self.records.values().sum()
    }
}

/// Result of comparing the live indices with a rebuild from a full scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    /// Records read during the scan
    pub scanned: usize,
    /// Records that were live (present, readable, not expired)
    pub live: usize,
    #[serde(flatten)]
    pub diff: IndexDiff,
}

impl IndexReport {
    pub fn is_consistent(&self) -> bool {
        self.diff.is_empty()
    }
}

/// Outcome of reading a record that may have to be expired.
enum Lookup {
    Live(MemoryEntry),
    Expired,
    Absent,
}

/// What a locked read of `(level, id)` found.
enum Existing {
    Record(MemoryEntry),
    Unreadable,
    Absent,
}

/// Tiered memory store over a [`StorageBackend`].
pub struct TieredStore {
    backend: Arc<dyn StorageBackend>,
    config: StoreConfig,
    writer: Mutex<()>,
}

impl std::fmt::Debug for TieredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TieredStore {
    /// Open the store described by `config`, creating its namespaces if needed.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn StorageBackend> = match config.backend {
            #[cfg(feature = "sqlite")]
            BackendKind::Sqlite => Arc::new(crate::backend::SqliteBackend::open(&config.path)?),
            #[cfg(not(feature = "sqlite"))]
            BackendKind::Sqlite => {
                return Err(Error::validation("backend", "sqlite support not compiled in"));
            }
            BackendKind::File => Arc::new(FileBackend::new(&config.path)),
        };
        Self::with_backend(backend, config)
    }

    /// Open over an already constructed backend.
    pub fn with_backend(backend: Arc<dyn StorageBackend>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        backend.init()?;

        let store = Self {
            backend,
            config,
            writer: Mutex::new(()),
        };
        let indexed = store.load_indices()?.ids().len();
        debug!(
            "Opened {} store at {} ({} indexed ids)",
            store.backend.name(),
            store.config.path.display(),
            indexed
        );
        Ok(store)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer.lock().map_err(|_| Error::LockPoisoned)
    }

    /// Run `f` against the indices as currently persisted.
    pub fn with_indices<R>(&self, f: impl FnOnce(&IndexSet) -> R) -> Result<R> {
        let _writer = self.lock()?;
        Ok(f(&self.load_indices()?))
    }

    /// Snapshot of the persisted indices.
    pub fn indices(&self) -> Result<IndexSet> {
        self.with_indices(IndexSet::clone)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entry operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist `entry` and index it, replacing any record at the same `(level, id)`.
    pub fn put(&self, entry: &MemoryEntry) -> Result<()> {
        entry.validate()?;
        let keys = IndexKeys::of(entry);
        let (level, id) = (entry.level(), entry.id());

        self.exclusive(|indices| {
            for other in MemoryLevel::ALL.into_iter().filter(|l| *l != level) {
                if let Existing::Record(found) = self.read_existing(other, id)? {
                    if !found.is_expired() {
                        return Err(Error::validation("id", format!("'{id}' is already stored at level {other}")));
                    }
                }
            }

            let mut touched = keys.kinds();
            let previous = match self.read_existing(level, id)? {
                Existing::Record(previous) => Some(previous),
                Existing::Unreadable => {
                    touched.extend(indices.remove_id(id));
                    None
                }
                Existing::Absent => None,
            };
            let previous_keys = previous.as_ref().map(IndexKeys::of);

            self.backend.write_record(entry)?;

            if let Some(prev) = &previous_keys {
                indices.unindex_keys(id, prev);
                touched.extend(prev.kinds());
            }
            indices.index_keys(id, &keys);

            if let Err(e) = self.save_indices(indices, &touched) {
                warn!("Failed to persist indices for {level}/{id}, restoring previous state: {e}");
                indices.unindex_keys(id, &keys);
                if let Some(prev) = &previous_keys {
                    indices.index_keys(id, prev);
                }
                let restored = match &previous {
                    Some(prev) => self.backend.write_record(prev),
                    None => self.backend.remove_record(level, id).map(|_| ()),
                };
                if let Err(undo) = restored.and_then(|_| self.save_indices(indices, &touched)) {
                    warn!("Could not restore {level}/{id} after failed write: {undo}");
                }
                return Err(e);
            }
            Ok(())
        })?;

        debug!("Stored {level}/{id}");
        Ok(())
    }

    /// Build an entry with a fresh id and timestamp without storing it.
    ///
    /// Without an explicit `ttl_seconds` the level's retention default applies.
    pub fn new_entry(
        &self,
        level: MemoryLevel,
        source: MemorySource,
        payload: Payload,
        ttl_seconds: Option<u64>,
    ) -> MemoryEntry {
        let ttl = ttl_seconds.or_else(|| self.config.retention.ttl_for(level));
        MemoryEntry::new(source, level, payload).with_ttl(ttl)
    }

    /// Build an entry with [`TieredStore::new_entry`] and store it.
    pub fn create(
        &self,
        level: MemoryLevel,
        source: MemorySource,
        payload: Payload,
        ttl_seconds: Option<u64>,
    ) -> Result<MemoryEntry> {
        let entry = self.new_entry(level, source, payload, ttl_seconds);
        self.put(&entry)?;
        Ok(entry)
    }

    /// The live entry at `(level, id)`. An expired record is deleted and `None` returned.
    pub fn get(&self, level: MemoryLevel, id: &str) -> Result<Option<MemoryEntry>> {
        match self.lookup(level, id, now_utc())? {
            Lookup::Live(entry) => Ok(Some(entry)),
            Lookup::Expired | Lookup::Absent => Ok(None),
        }
    }

    /// The first live entry with this id, probing immediate, working, longterm.
    pub fn find(&self, id: &str) -> Result<Option<MemoryEntry>> {
        self.resolve_at(id, now_utc())
    }

    /// Delete the record at `(level, id)`. Returns whether one was removed.
    pub fn delete(&self, level: MemoryLevel, id: &str) -> Result<bool> {
        let removed = self.exclusive(|indices| self.remove_locked(indices, level, id))?;
        if removed {
            debug!("Deleted {level}/{id}");
        }
        Ok(removed)
    }

    /// Remove every expired record. Returns how many were removed.
    pub fn sweep(&self) -> Result<usize> {
        let now = now_utc();
        let mut removed = 0;

        for level in MemoryLevel::ALL {
            for id in self.backend.list_ids(level)? {
                let expired = match self.read_placed(level, &id) {
                    Ok(Some(entry)) => entry.is_expired_at(now),
                    Ok(None) => false,
                    Err(e) => {
                        warn!("Skipping unreadable record {level}/{id}: {e}");
                        continue;
                    }
                };
                if expired && matches!(self.expire_if_stale(level, &id, now)?, Lookup::Expired) {
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!("Sweep removed {removed} expired entries");
        } else {
            debug!("Sweep found no expired entries");
        }
        Ok(removed)
    }

    /// Record and index counts.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut records = BTreeMap::new();
        for level in MemoryLevel::ALL {
            records.insert(level, self.backend.list_ids(level)?.len());
        }
        let (index_keys, indexed_ids) = self.with_indices(|ix| (ix.key_counts(), ix.ids().len()))?;

        Ok(StoreStats {
            backend: self.backend.name(),
            records,
            index_keys,
            indexed_ids,
        })
    }

    /// Up to `limit` ids per level, most recently written first.
    pub(crate) fn recent_ids(&self, level: MemoryLevel, limit: usize) -> Result<Vec<String>> {
        self.backend.recent_ids(level, limit)
    }

    /// First live entry with this id at `now`, probing levels in order.
    pub(crate) fn resolve_at(&self, id: &str, now: DateTime<Utc>) -> Result<Option<MemoryEntry>> {
        for level in MemoryLevel::ALL {
            if let Lookup::Live(entry) = self.lookup(level, id, now)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Index maintenance
    // ─────────────────────────────────────────────────────────────────────────

    /// Rescan every level and replace the persisted indices.
    ///
    /// Expired records found during the scan are removed.
    pub fn rebuild_indices(&self) -> Result<IndexSet> {
        let now = now_utc();
        self.exclusive(|indices| {
            let mut live = Vec::new();
            let mut expired = 0;
            for level in MemoryLevel::ALL {
                for entry in self.scan_level(level)? {
                    if entry.is_expired_at(now) {
                        self.backend.remove_record(level, entry.id())?;
                        expired += 1;
                    } else {
                        live.push(entry);
                    }
                }
            }

            let rebuilt = IndexSet::rebuild(&live);
            self.save_indices(&rebuilt, &IndexKind::ALL.into_iter().collect())?;
            let diff = indices.diff(&rebuilt);

            info!(
                "Rebuilt indices from {} live entries ({} expired removed, {} dangling, {} missing)",
                live.len(),
                expired,
                diff.dangling.len(),
                diff.missing.len()
            );
            Ok(rebuilt)
        })
    }

    /// Compare the current indices with a rebuild from a full scan. Modifies nothing.
    pub fn verify_indices(&self) -> Result<IndexReport> {
        let now = now_utc();
        self.exclusive(|indices| {
            let mut scanned = 0;
            let mut live = Vec::new();
            for level in MemoryLevel::ALL {
                let entries = self.scan_level(level)?;
                scanned += entries.len();
                live.extend(entries.into_iter().filter(|e| !e.is_expired_at(now)));
            }

            let diff = indices.diff(&IndexSet::rebuild(&live));
            Ok(IndexReport {
                scanned,
                live: live.len(),
                diff,
            })
        })
    }

    /// Fail with [`Error::IndexCorruption`] when verification finds differences.
    pub fn ensure_consistent(&self) -> Result<()> {
        let report = self.verify_indices()?;
        if report.is_consistent() {
            return Ok(());
        }
        Err(Error::IndexCorruption {
            dangling: report.diff.dangling.len(),
            missing: report.diff.missing.len(),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `f` holding this handle's lock and the medium's exclusive lock, over
    /// indices loaded from the medium after both were taken. Medium writes made
    /// by `f` are committed only when it succeeds.
    fn exclusive<R>(&self, f: impl FnOnce(&mut IndexSet) -> Result<R>) -> Result<R> {
        let _writer = self.lock()?;
        let medium = self.backend.lock_exclusive()?;
        let mut indices = self.load_indices()?;
        let result = f(&mut indices)?;
        medium.commit()?;
        Ok(result)
    }

    fn load_indices(&self) -> Result<IndexSet> {
        Ok(IndexSet::from_parts(
            self.backend.load_index(IndexKind::Sessions)?,
            self.backend.load_index(IndexKind::Tags)?,
            self.backend.load_index(IndexKind::Sources)?,
        ))
    }

    /// Read `(level, id)`, ignoring a document whose own level or id differs.
    fn read_placed(&self, level: MemoryLevel, id: &str) -> Result<Option<MemoryEntry>> {
        match self.backend.read_record(level, id)? {
            Some(entry) if entry.level() != level || entry.id() != id => {
                warn!("Ignoring misplaced record {level}/{id} holding {}/{}", entry.level(), entry.id());
                Ok(None)
            }
            found => Ok(found),
        }
    }

    /// Read without the lock, falling back to a locked expiry check.
    fn lookup(&self, level: MemoryLevel, id: &str, now: DateTime<Utc>) -> Result<Lookup> {
        match self.read_placed(level, id)? {
            None => Ok(Lookup::Absent),
            Some(entry) if !entry.is_expired_at(now) => Ok(Lookup::Live(entry)),
            Some(_) => self.expire_if_stale(level, id, now),
        }
    }

    /// Shared expiry path for reads and sweeps. Re-reads under the lock and
    /// deletes only if the record is still expired at `now`.
    fn expire_if_stale(&self, level: MemoryLevel, id: &str, now: DateTime<Utc>) -> Result<Lookup> {
        self.exclusive(|indices| match self.read_placed(level, id)? {
            None => Ok(Lookup::Absent),
            Some(entry) if !entry.is_expired_at(now) => Ok(Lookup::Live(entry)),
            Some(entry) => {
                self.withdraw_locked(indices, level, id, &IndexKeys::of(&entry))?;
                debug!("Expired {level}/{id}");
                Ok(Lookup::Expired)
            }
        })
    }

    fn remove_locked(&self, indices: &mut IndexSet, level: MemoryLevel, id: &str) -> Result<bool> {
        match self.read_existing(level, id)? {
            Existing::Absent => Ok(false),
            Existing::Record(entry) => {
                self.withdraw_locked(indices, level, id, &IndexKeys::of(&entry))?;
                Ok(true)
            }
            Existing::Unreadable => {
                let touched = indices.remove_id(id);
                self.save_indices(indices, &touched)?;
                self.backend.remove_record(level, id)
            }
        }
    }

    /// Unindex and persist, then remove the record.
    fn withdraw_locked(&self, indices: &mut IndexSet, level: MemoryLevel, id: &str, keys: &IndexKeys) -> Result<()> {
        indices.unindex_keys(id, keys);
        self.save_indices(indices, &keys.kinds())?;
        self.backend.remove_record(level, id)?;
        Ok(())
    }

    /// Locked read that classifies undecodable or misplaced documents as unreadable.
    fn read_existing(&self, level: MemoryLevel, id: &str) -> Result<Existing> {
        match self.backend.read_record(level, id) {
            Ok(Some(entry)) if entry.level() != level || entry.id() != id => {
                warn!("Record {level}/{id} holds {}/{}", entry.level(), entry.id());
                Ok(Existing::Unreadable)
            }
            Ok(Some(entry)) => Ok(Existing::Record(entry)),
            Ok(None) => Ok(Existing::Absent),
            Err(Error::Serialization(e)) => {
                warn!("Record {level}/{id} is unreadable: {e}");
                Ok(Existing::Unreadable)
            }
            Err(e) => Err(e),
        }
    }

    /// Every readable record in a level. Unreadable or misplaced records are logged and skipped.
    fn scan_level(&self, level: MemoryLevel) -> Result<Vec<MemoryEntry>> {
        let mut entries = Vec::new();
        for id in self.backend.list_ids(level)? {
            match self.read_placed(level, &id) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record {level}/{id}: {e}"),
            }
        }
        Ok(entries)
    }

    fn save_indices(&self, indices: &IndexSet, kinds: &BTreeSet<IndexKind>) -> Result<()> {
        for kind in kinds {
            self.backend.save_index(*kind, indices.get(*kind))?;
        }
        Ok(())
    }
}

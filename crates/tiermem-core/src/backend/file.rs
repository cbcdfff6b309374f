//! JSON file storage backend.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/immediate/<id>.json
//! <root>/working/<id>.json
//! <root>/longterm/<id>.json
//! <root>/indices/{sessions,tags,sources}.json
//! ```
//!
//! Files are replaced by write-then-rename so readers never observe a partial
//! document. Writers from every process serialise on an advisory lock on
//! `<root>/.lock`.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use fs2::FileExt;
use tracing::debug;

use super::{MediumLock, StorageBackend};
use crate::entry::{MemoryEntry, MemoryLevel};
use crate::error::{Error, Result};
use crate::index::{Index, IndexKind};

const RECORD_EXT: &str = "json";
const INDEX_DIR: &str = "indices";
const LOCK_FILE: &str = ".lock";

/// Directory-tree backend compatible with externally inspected store files.
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn level_dir(&self, level: MemoryLevel) -> PathBuf {
        self.root.join(level.as_str())
    }

    fn record_path(&self, level: MemoryLevel, id: &str) -> Result<PathBuf> {
        let safe = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\', '\0']);
        if !safe {
            return Err(Error::validation("id", format!("'{id}' is not usable as a file name")));
        }
        Ok(self.level_dir(level).join(format!("{id}.{RECORD_EXT}")))
    }

    fn index_path(&self, kind: IndexKind) -> PathBuf {
        self.root.join(INDEX_DIR).join(format!("{}.{RECORD_EXT}", kind.as_str()))
    }

    /// Record files in a level with their modification time.
    fn scan_level(&self, level: MemoryLevel) -> Result<Vec<(String, SystemTime)>> {
        let dir = self.level_dir(level);
        let read_dir = match fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for item in read_dir {
            let item = item?;
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let modified = item.metadata()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            records.push((id.to_string(), modified));
        }
        Ok(records)
    }
}

/// Exclusive `flock` on the store's lock file. Closing the file releases it.
struct FileLock {
    _file: File,
}

impl MediumLock for FileLock {
    fn commit(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Write `contents` to `path` atomically (temp file + rename).
fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl StorageBackend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    fn init(&self) -> Result<()> {
        for level in MemoryLevel::ALL {
            fs::create_dir_all(self.level_dir(level))?;
        }
        fs::create_dir_all(self.root.join(INDEX_DIR))?;
        debug!("Initialised file store at {}", self.root.display());
        Ok(())
    }

    fn write_record(&self, entry: &MemoryEntry) -> Result<()> {
        let path = self.record_path(entry.level(), entry.id())?;
        write_atomic(&path, &entry.to_document()?)
    }

    fn read_record(&self, level: MemoryLevel, id: &str) -> Result<Option<MemoryEntry>> {
        let path = self.record_path(level, id)?;
        read_optional(&path)?
            .as_deref()
            .map(MemoryEntry::from_document)
            .transpose()
    }

    fn remove_record(&self, level: MemoryLevel, id: &str) -> Result<bool> {
        let path = self.record_path(level, id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_ids(&self, level: MemoryLevel) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.scan_level(level)?.into_iter().map(|(id, _)| id).collect();
        ids.sort();
        Ok(ids)
    }

    fn recent_ids(&self, level: MemoryLevel, limit: usize) -> Result<Vec<String>> {
        let mut records = self.scan_level(level)?;
        records.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(records.into_iter().take(limit).map(|(id, _)| id).collect())
    }

    fn load_index(&self, kind: IndexKind) -> Result<Index> {
        match read_optional(&self.index_path(kind))? {
            Some(contents) => Ok(serde_json::from_str(&contents)?),
            None => Ok(Index::new()),
        }
    }

    fn save_index(&self, kind: IndexKind, index: &Index) -> Result<()> {
        write_atomic(&self.index_path(kind), &serde_json::to_string_pretty(index)?)
    }

    fn lock_exclusive(&self) -> Result<Box<dyn MediumLock + '_>> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.root.join(LOCK_FILE))?;
        FileExt::lock_exclusive(&file)?;
        Ok(Box::new(FileLock { _file: file }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{MemorySource, Payload, SourceType};
    use tempfile::tempdir;

    fn entry(level: MemoryLevel) -> MemoryEntry {
        MemoryEntry::new(MemorySource::new(SourceType::Function, "f1"), level, Payload::new())
    }

    #[test]
    fn test_init_creates_namespaces() {
        let temp = tempdir().unwrap();
        let backend = FileBackend::new(temp.path().join("store"));
        backend.init().unwrap();

        for dir in ["immediate", "working", "longterm", "indices"] {
            assert!(temp.path().join("store").join(dir).is_dir(), "{dir} missing");
        }
    }

    #[test]
    fn test_record_file_layout() {
        let temp = tempdir().unwrap();
        let backend = FileBackend::new(temp.path());
        backend.init().unwrap();

        let e = entry(MemoryLevel::Longterm);
        backend.write_record(&e).unwrap();

        let path = temp.path().join("longterm").join(format!("{}.json", e.id()));
        assert!(path.is_file());
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(backend.read_record(MemoryLevel::Longterm, e.id()).unwrap(), Some(e.clone()));
        assert_eq!(backend.read_record(MemoryLevel::Working, e.id()).unwrap(), None);

        assert!(backend.remove_record(MemoryLevel::Longterm, e.id()).unwrap());
        assert!(!backend.remove_record(MemoryLevel::Longterm, e.id()).unwrap());
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let temp = tempdir().unwrap();
        let backend = FileBackend::new(temp.path());
        backend.init().unwrap();

        let err = backend.read_record(MemoryLevel::Working, "../indices/tags").unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_list_and_recent_ignore_foreign_files() {
        let temp = tempdir().unwrap();
        let backend = FileBackend::new(temp.path());
        backend.init().unwrap();

        for _ in 0..4 {
            backend.write_record(&entry(MemoryLevel::Immediate)).unwrap();
        }
        fs::write(temp.path().join("immediate").join("notes.txt"), "x").unwrap();

        assert_eq!(backend.list_ids(MemoryLevel::Immediate).unwrap().len(), 4);
        assert_eq!(backend.recent_ids(MemoryLevel::Immediate, 2).unwrap().len(), 2);
        assert!(backend.list_ids(MemoryLevel::Working).unwrap().is_empty());
    }

    #[test]
    fn test_index_file_is_flat_mapping() {
        let temp = tempdir().unwrap();
        let backend = FileBackend::new(temp.path());
        backend.init().unwrap();

        let mut index = Index::new();
        index.insert("S1".into(), vec!["a".into(), "b".into()]);
        backend.save_index(IndexKind::Sessions, &index).unwrap();

        let raw = fs::read_to_string(temp.path().join("indices").join("sessions.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, serde_json::json!({"S1": ["a", "b"]}));
        assert_eq!(backend.load_index(IndexKind::Sessions).unwrap(), index);
    }

    #[test]
    fn test_exclusive_lock_excludes_other_handles() {
        let temp = tempdir().unwrap();
        let backend = FileBackend::new(temp.path());
        backend.init().unwrap();

        let lock = backend.lock_exclusive().unwrap();
        let other = File::open(temp.path().join(LOCK_FILE)).unwrap();
        assert!(FileExt::try_lock_exclusive(&other).is_err());

        lock.commit().unwrap();
        assert!(FileExt::try_lock_exclusive(&other).is_ok());
        assert!(backend.list_ids(MemoryLevel::Immediate).unwrap().is_empty());
    }
}

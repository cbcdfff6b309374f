//! Secondary indices over live entries.
//!
//! Three mappings (session, tag, source) from key to the ids of the entries
//! carrying that key. The set is derived data: [`IndexSet::rebuild`] over every
//! live entry reproduces it exactly. Id lists are kept sorted and unique and
//! empty keys are dropped, so incremental maintenance and rebuild converge on
//! identical documents.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entry::{MemoryEntry, SourceType, source_key};

/// One index: key -> sorted entry ids.
pub type Index = BTreeMap<String, Vec<String>>;

/// Which of the three indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Sessions,
    Tags,
    Sources,
}

impl IndexKind {
    pub const ALL: [IndexKind; 3] = [Self::Sessions, Self::Tags, Self::Sources];

    /// Namespace name used by storage backends
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sessions => "sessions",
            Self::Tags => "tags",
            Self::Sources => "sources",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Keys an entry is indexed under. Computed outside the store lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKeys {
    pub session: Option<String>,
    pub tags: Vec<String>,
    pub source: String,
}

impl IndexKeys {
    pub fn of(entry: &MemoryEntry) -> Self {
        Self {
            session: entry.session().map(String::from),
            tags: entry.tags(),
            source: entry.source().key(),
        }
    }
}

/// A single `(index, key, id)` reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct IndexRef {
    pub kind: IndexKind,
    pub key: String,
    pub id: String,
}

/// Difference between two index sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexDiff {
    /// References only in `self` (nothing live backs them)
    pub dangling: Vec<IndexRef>,
    /// References only in `other` (live entries not represented)
    pub missing: Vec<IndexRef>,
}

impl IndexDiff {
    pub fn is_empty(&self) -> bool {
        self.dangling.is_empty() && self.missing.is_empty()
    }
}

/// Session, tag and source indices.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSet {
    sessions: Index,
    tags: Index,
    sources: Index,
}

impl IndexSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble from persisted indices, normalising each id list.
    pub fn from_parts(sessions: Index, tags: Index, sources: Index) -> Self {
        let normalise = |index: Index| -> Index {
            index
                .into_iter()
                .filter_map(|(key, mut ids)| {
                    ids.sort();
                    ids.dedup();
                    (!ids.is_empty()).then_some((key, ids))
                })
                .collect()
        };
        Self {
            sessions: normalise(sessions),
            tags: normalise(tags),
            sources: normalise(sources),
        }
    }

    /// Rebuild from a full scan of live entries.
    pub fn rebuild<'a>(entries: impl IntoIterator<Item = &'a MemoryEntry>) -> Self {
        let mut set = Self::new();
        for entry in entries {
            set.index(entry);
        }
        set
    }

    pub fn get(&self, kind: IndexKind) -> &Index {
        match kind {
            IndexKind::Sessions => &self.sessions,
            IndexKind::Tags => &self.tags,
            IndexKind::Sources => &self.sources,
        }
    }

    fn get_mut(&mut self, kind: IndexKind) -> &mut Index {
        match kind {
            IndexKind::Sessions => &mut self.sessions,
            IndexKind::Tags => &mut self.tags,
            IndexKind::Sources => &mut self.sources,
        }
    }

    /// Add the entry's id under all of its keys. Idempotent.
    pub fn index(&mut self, entry: &MemoryEntry) {
        self.index_keys(entry.id(), &IndexKeys::of(entry));
    }

    /// Remove the entry's id from all of its keys. Missing ids are a no-op.
    pub fn unindex(&mut self, entry: &MemoryEntry) {
        self.unindex_keys(entry.id(), &IndexKeys::of(entry));
    }

    pub fn index_keys(&mut self, id: &str, keys: &IndexKeys) {
        for (kind, key) in keys.iter() {
            insert_sorted(self.get_mut(kind), key, id);
        }
    }

    pub fn unindex_keys(&mut self, id: &str, keys: &IndexKeys) {
        for (kind, key) in keys.iter() {
            remove_sorted(self.get_mut(kind), key, id);
        }
    }

    pub fn lookup_by_session(&self, session_id: &str) -> BTreeSet<String> {
        lookup(&self.sessions, session_id)
    }

    pub fn lookup_by_source(&self, kind: SourceType, id: &str) -> BTreeSet<String> {
        lookup(&self.sources, &source_key(kind, id))
    }

    /// Union of the ids under each tag.
    ///
    /// With `wildcard_allowed`, a tag containing `*`, `?` or `[` is matched as a
    /// glob pattern against every indexed tag. Exact tags are direct lookups.
    pub fn lookup_by_tags<S: AsRef<str>>(&self, tags: &[S], wildcard_allowed: bool) -> BTreeSet<String> {
        let mut ids = BTreeSet::new();
        for tag in tags {
            let tag = tag.as_ref();
            match wildcard_pattern(tag, wildcard_allowed) {
                Some(pattern) => {
                    for (indexed, tag_ids) in &self.tags {
                        if pattern.matches(indexed) {
                            ids.extend(tag_ids.iter().cloned());
                        }
                    }
                }
                None => ids.extend(lookup(&self.tags, tag)),
            }
        }
        ids
    }

    /// Remove an id from every key of every index, for records whose keys are
    /// unknown (unreadable documents). Returns the indices touched.
    pub fn remove_id(&mut self, id: &str) -> BTreeSet<IndexKind> {
        let mut touched = BTreeSet::new();
        for kind in IndexKind::ALL {
            let index = self.get_mut(kind);
            let keys: Vec<String> = index
                .iter()
                .filter(|(_, ids)| ids.iter().any(|candidate| candidate == id))
                .map(|(key, _)| key.clone())
                .collect();
            for key in keys {
                remove_sorted(index, &key, id);
                touched.insert(kind);
            }
        }
        touched
    }

    /// Every id referenced by any index.
    pub fn ids(&self) -> BTreeSet<String> {
        IndexKind::ALL
            .iter()
            .flat_map(|kind| self.get(*kind).values().flatten().cloned())
            .collect()
    }

    /// Number of keys in each index.
    pub fn key_counts(&self) -> BTreeMap<IndexKind, usize> {
        IndexKind::ALL.iter().map(|kind| (*kind, self.get(*kind).len())).collect()
    }

    /// References present in only one of `self` and `other`.
    pub fn diff(&self, other: &IndexSet) -> IndexDiff {
        let mine = self.references();
        let theirs = other.references();
        IndexDiff {
            dangling: mine.difference(&theirs).cloned().collect(),
            missing: theirs.difference(&mine).cloned().collect(),
        }
    }

    fn references(&self) -> BTreeSet<IndexRef> {
        let mut refs = BTreeSet::new();
        for kind in IndexKind::ALL {
            for (key, ids) in self.get(kind) {
                for id in ids {
                    refs.insert(IndexRef {
                        kind,
                        key: key.clone(),
                        id: id.clone(),
                    });
                }
            }
        }
        refs
    }
}

impl IndexKeys {
    fn iter(&self) -> impl Iterator<Item = (IndexKind, &str)> {
        self.session
            .iter()
            .map(|s| (IndexKind::Sessions, s.as_str()))
            .chain(self.tags.iter().map(|t| (IndexKind::Tags, t.as_str())))
            .chain(std::iter::once((IndexKind::Sources, self.source.as_str())))
    }

    /// Indices touched when these keys are added or removed.
    pub fn kinds(&self) -> BTreeSet<IndexKind> {
        self.iter().map(|(kind, _)| kind).collect()
    }
}

fn wildcard_pattern(tag: &str, wildcard_allowed: bool) -> Option<glob::Pattern> {
    if !wildcard_allowed || !tag.contains(['*', '?', '[']) {
        return None;
    }
    match glob::Pattern::new(tag) {
        Ok(pattern) => Some(pattern),
        Err(e) => {
            warn!("Invalid tag pattern '{tag}', using exact match: {e}");
            None
        }
    }
}

fn lookup(index: &Index, key: &str) -> BTreeSet<String> {
    index.get(key).map(|ids| ids.iter().cloned().collect()).unwrap_or_default()
}

fn insert_sorted(index: &mut Index, key: &str, id: &str) {
    let ids = index.entry(key.to_string()).or_default();
    if let Err(pos) = ids.binary_search_by(|existing| existing.as_str().cmp(id)) {
        ids.insert(pos, id.to_string());
    }
}

fn remove_sorted(index: &mut Index, key: &str, id: &str) {
    let Some(ids) = index.get_mut(key) else {
        return;
    };
    if let Ok(pos) = ids.binary_search_by(|existing| existing.as_str().cmp(id)) {
        ids.remove(pos);
    }
    if ids.is_empty() {
        index.remove(key);
    }
}

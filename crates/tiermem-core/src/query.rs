//! Query engine.
//!
//! Candidate ids come from the session index, the tag index, or a bounded
//! recency scan, in that order of precedence. Each candidate resolves through
//! the store's expire-on-read path; missing, expired and unreadable candidates
//! are dropped.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::entry::{MemoryEntry, MemoryLevel};
use crate::error::Result;
use crate::store::TieredStore;
use crate::time::now_utc;

/// Query parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryQuery {
    pub tags: Vec<String>,
    pub session_id: Option<String>,
    pub level: Option<MemoryLevel>,
    /// Only entries created strictly after this instant
    pub since: Option<DateTime<Utc>>,
    /// Treat tags containing `*`, `?` or `[` as glob patterns (default: true)
    pub wildcard: bool,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            tags: Vec::new(),
            session_id: None,
            level: None,
            since: None,
            wildcard: true,
        }
    }
}

impl MemoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(session_id: impl Into<String>) -> Self {
        Self::new().with_session(session_id)
    }

    pub fn tags<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().with_tags(tags)
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_level(mut self, level: MemoryLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn with_since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn with_wildcard(mut self, wildcard: bool) -> Self {
        self.wildcard = wildcard;
        self
    }

    /// Neither a session nor tags: falls back to the recency scan.
    pub fn is_unfiltered(&self) -> bool {
        self.session_id.is_none() && self.tags.is_empty()
    }

    fn accepts(&self, entry: &MemoryEntry) -> bool {
        self.level.is_none_or(|level| entry.level() == level)
            && self.since.is_none_or(|since| entry.created_at() > since)
    }
}

/// Matching entries, newest first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub entries: Vec<MemoryEntry>,
    /// Set when candidates came from the bounded recency scan, so older
    /// matching entries may have been left out.
    pub partial: bool,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TieredStore {
    /// Run a query.
    pub fn query(&self, query: &MemoryQuery) -> Result<QueryResult> {
        let now = now_utc();
        let (candidates, partial) = self.candidates(query)?;

        let mut entries = Vec::with_capacity(candidates.len());
        for id in &candidates {
            match self.resolve_at(id, now) {
                Ok(Some(entry)) if query.accepts(&entry) => entries.push(entry),
                Ok(Some(_)) => {}
                Ok(None) => debug!("Dropping query candidate {id}: no live record"),
                Err(e) if e.is_storage_unavailable() => return Err(e),
                Err(e) => debug!("Dropping query candidate {id}: {e}"),
            }
        }

        entries.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(QueryResult { entries, partial })
    }

    fn candidates(&self, query: &MemoryQuery) -> Result<(BTreeSet<String>, bool)> {
        if let Some(session_id) = &query.session_id {
            let ids = self.with_indices(|ix| ix.lookup_by_session(session_id))?;
            return Ok((ids, false));
        }

        if !query.tags.is_empty() {
            let ids = self.with_indices(|ix| ix.lookup_by_tags(query.tags.as_slice(), query.wildcard))?;
            return Ok((ids, false));
        }

        let limit = self.config().recency_limit;
        let levels = match query.level {
            Some(level) => vec![level],
            None => MemoryLevel::ALL.to_vec(),
        };
        let mut ids = BTreeSet::new();
        for level in levels {
            ids.extend(self.recent_ids(level, limit)?);
        }
        Ok((ids, true))
    }
}

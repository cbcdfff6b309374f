//! Session memory helpers
//!
//! Context, pattern and handoff entries built on top of [`TieredStore`]. The
//! read-modify-write helpers (`update_focus`, `add_to_working_set`) are not
//! atomic across calls; concurrent writers to the same session may race.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::entry::{MemoryEntry, MemoryLevel, MemorySource, Payload, SourceType, TAGS_KEY, TYPE_KEY};
use crate::error::{Error, Result};
use crate::query::MemoryQuery;
use crate::store::TieredStore;

/// Context entries live for 24 hours
pub const CONTEXT_TTL_SECS: u64 = 86_400;
/// Pattern entries live for 7 days
pub const PATTERN_TTL_SECS: u64 = 604_800;
/// Handoff entries live for 1 hour
pub const HANDOFF_TTL_SECS: u64 = 3_600;

pub const CONTEXT_TAG: &str = "CONTEXT";
pub const PATTERN_TAG: &str = "PATTERN";
pub const HANDOFF_TAG: &str = "HANDOFF";

const CONTEXT_KIND: &str = "context";
const PATTERN_KIND: &str = "pattern";
const HANDOFF_KIND: &str = "handoff";

const FOCUS_KEY: &str = "current_focus";
const WORKING_SET_KEY: &str = "working_set";
const PATTERN_KEY: &str = "pattern";

/// Everything known about a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextPackage {
    pub session_id: String,
    /// Id of the context entry the focus and working set came from
    pub context_id: String,
    pub current_focus: Value,
    pub working_set: Payload,
    /// Pattern bodies saved in this session, newest first
    pub patterns: Vec<Value>,
    #[serde(with = "crate::time::iso8601")]
    pub last_updated: DateTime<Utc>,
    /// Live entries of any kind in the session
    pub entry_count: usize,
}

/// Session-oriented API over a shared store
pub struct SessionMemory {
    store: Arc<TieredStore>,
}

impl SessionMemory {
    pub fn new(store: Arc<TieredStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &TieredStore {
        &self.store
    }

    /// Start a context for a session. The entry is attributed to `session_id`
    /// so later session lookups find it.
    pub fn create_context(&self, session_id: &str, source: MemorySource, initial_focus: Value) -> Result<String> {
        if session_id.trim().is_empty() {
            return Err(Error::validation("session_id", "must not be empty"));
        }

        let mut payload = Payload::new();
        payload.insert(TYPE_KEY.into(), json!(CONTEXT_KIND));
        payload.insert("session_id".into(), json!(session_id));
        payload.insert(FOCUS_KEY.into(), initial_focus);
        payload.insert(WORKING_SET_KEY.into(), json!({}));
        payload.insert(TAGS_KEY.into(), json!([CONTEXT_TAG, format!("SESSION_{session_id}")]));

        let entry = self.store.create(
            MemoryLevel::Immediate,
            source.with_session(session_id),
            payload,
            Some(CONTEXT_TTL_SECS),
        )?;
        debug!(session_id, context_id = entry.id(), "Created session context");
        Ok(entry.id().to_string())
    }

    /// Replace the focus of the session's most recent context.
    pub fn update_focus(&self, session_id: &str, focus: Value) -> Result<MemoryEntry> {
        let mut context = self.latest_context(session_id)?;
        context.payload_mut().insert(FOCUS_KEY.into(), focus);
        self.store.put(&context)?;
        Ok(context)
    }

    /// Set `working_set[key] = value` on the session's most recent context.
    pub fn add_to_working_set(&self, session_id: &str, key: &str, value: Value) -> Result<MemoryEntry> {
        let mut context = self.latest_context(session_id)?;
        let payload = context.payload_mut();
        let working_set = payload
            .entry(WORKING_SET_KEY)
            .or_insert_with(|| json!({}));
        if !working_set.is_object() {
            *working_set = json!({});
        }
        if let Value::Object(set) = working_set {
            set.insert(key.to_string(), value);
        }
        self.store.put(&context)?;
        Ok(context)
    }

    /// Save a discovered pattern in working memory.
    pub fn save_pattern(&self, source: MemorySource, pattern: Value, tags: &[String]) -> Result<String> {
        let mut all_tags: Vec<String> = tags.to_vec();
        all_tags.push(PATTERN_TAG.to_string());

        let mut payload = Payload::new();
        payload.insert(TYPE_KEY.into(), json!(PATTERN_KIND));
        payload.insert(PATTERN_KEY.into(), pattern);
        payload.insert(TAGS_KEY.into(), json!(all_tags));

        let entry = self
            .store
            .create(MemoryLevel::Working, source, payload, Some(PATTERN_TTL_SECS))?;
        Ok(entry.id().to_string())
    }

    /// Package context for another producer to pick up.
    pub fn create_handoff(
        &self,
        from: MemorySource,
        to_type: SourceType,
        context: Value,
        instructions: &str,
    ) -> Result<String> {
        let mut payload = Payload::new();
        payload.insert(TYPE_KEY.into(), json!(HANDOFF_KIND));
        payload.insert("from".into(), serde_json::to_value(&from)?);
        payload.insert("to".into(), json!({ "type": to_type }));
        payload.insert("context".into(), context);
        payload.insert("instructions".into(), json!(instructions));
        payload.insert(TAGS_KEY.into(), json!([HANDOFF_TAG, format!("FROM_{}", from.kind)]));

        let entry = self
            .store
            .create(MemoryLevel::Immediate, from, payload, Some(HANDOFF_TTL_SECS))?;
        debug!(handoff_id = entry.id(), to = %to_type, "Created handoff");
        Ok(entry.id().to_string())
    }

    /// The session's latest context with its patterns, or `None` if it has no
    /// live context.
    pub fn load_context(&self, session_id: &str) -> Result<Option<ContextPackage>> {
        let entries = self.store.query(&MemoryQuery::session(session_id))?.entries;

        let Some(context) = entries.iter().find(|e| e.kind() == Some(CONTEXT_KIND)) else {
            return Ok(None);
        };

        let patterns = entries
            .iter()
            .filter(|e| e.kind() == Some(PATTERN_KIND))
            .filter_map(|e| e.payload().get(PATTERN_KEY).cloned())
            .collect();

        let working_set = match context.payload().get(WORKING_SET_KEY) {
            Some(Value::Object(set)) => set.clone(),
            _ => Payload::new(),
        };

        Ok(Some(ContextPackage {
            session_id: session_id.to_string(),
            context_id: context.id().to_string(),
            current_focus: context.payload().get(FOCUS_KEY).cloned().unwrap_or_else(|| json!({})),
            working_set,
            patterns,
            last_updated: context.created_at(),
            entry_count: entries.len(),
        }))
    }

    /// Newest live context entry of a session.
    fn latest_context(&self, session_id: &str) -> Result<MemoryEntry> {
        self.store
            .query(&MemoryQuery::session(session_id))?
            .entries
            .into_iter()
            .find(|e| e.kind() == Some(CONTEXT_KIND))
            .ok_or_else(|| Error::not_found("session context", session_id))
    }
}

//! Memory Entry Type Definitions
//!
//! An entry is the atomic unit of storage: immutable identity (`id`,
//! `created_at`, `level`), a mutable payload, and classification metadata.
//! Its persisted document layout is shared with external collaborators that
//! read the store's files directly, so field names follow the wire format.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::time;

/// Schema-less entry payload.
pub type Payload = Map<String, Value>;

/// Payload key holding the entry's tag list.
pub const TAGS_KEY: &str = "tags";

/// Tag list key written by older producers; read alongside [`TAGS_KEY`].
pub const LEGACY_TAGS_KEY: &str = "meta_tags";

/// Payload key holding the entry's type discriminator.
pub const TYPE_KEY: &str = "type";

/// Visibility assigned when the producer does not set one.
pub const DEFAULT_VISIBILITY: &str = "private";

fn default_visibility() -> String {
    DEFAULT_VISIBILITY.to_string()
}

/// Memory level (storage tier)
///
/// Levels partition storage and select the default retention policy. There is
/// no promotion between levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryLevel {
    Immediate,
    Working,
    Longterm,
}

impl MemoryLevel {
    /// All levels in resolution order.
    pub const ALL: [MemoryLevel; 3] = [Self::Immediate, Self::Working, Self::Longterm];

    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Working => "working",
            Self::Longterm => "longterm",
        }
    }
}

impl fmt::Display for MemoryLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for MemoryLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "working" => Ok(Self::Working),
            "longterm" => Ok(Self::Longterm),
            other => Err(Error::validation(
                "level",
                format!("unknown value '{other}' (expected immediate, working or longterm)"),
            )),
        }
    }
}

/// Kind of producer that wrote an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Chat,
    Agent,
    Function,
    Api,
}

impl SourceType {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Agent => "agent",
            Self::Function => "function",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chat" => Ok(Self::Chat),
            "agent" => Ok(Self::Agent),
            "function" => Ok(Self::Function),
            "api" => Ok(Self::Api),
            other => Err(Error::validation(
                "source.type",
                format!("unknown value '{other}' (expected chat, agent, function or api)"),
            )),
        }
    }
}

/// Producer of an entry.
///
/// `session`, when present, is the join key for session-scoped queries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemorySource {
    #[serde(rename = "type")]
    pub kind: SourceType,
    pub id: String,
    #[serde(default)]
    pub session: Option<String>,
}

impl MemorySource {
    /// Create a source without a session
    pub fn new(kind: SourceType, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            session: None,
        }
    }

    /// Attach a session id
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = Some(session.into());
        self
    }

    /// Build a source from untyped input, rejecting unknown types and empty ids.
    pub fn parse(kind: &str, id: &str, session: Option<&str>) -> Result<Self> {
        let source = Self {
            kind: kind.parse()?,
            id: id.to_string(),
            session: session.map(String::from),
        };
        source.validate()?;
        Ok(source)
    }

    /// Source index key: `"{type}:{id}"`.
    pub fn key(&self) -> String {
        source_key(self.kind, &self.id)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("source.id", "must not be empty"));
        }
        if self.session.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(Error::validation("source.session", "must not be empty when present"));
        }
        Ok(())
    }
}

/// Source index key for a type/id pair.
pub fn source_key(kind: SourceType, id: &str) -> String {
    format!("{}:{}", kind.as_str(), id)
}

/// One stored memory record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    id: String,
    #[serde(rename = "timestamp", with = "time::iso8601")]
    created_at: DateTime<Utc>,
    source: MemorySource,
    level: MemoryLevel,
    #[serde(rename = "data", default)]
    payload: Payload,
    #[serde(rename = "ttl", default)]
    ttl_seconds: Option<u64>,
    #[serde(default = "default_visibility")]
    visibility: String,
}

impl MemoryEntry {
    /// Create a new entry with a fresh id and the current timestamp.
    pub fn new(source: MemorySource, level: MemoryLevel, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: time::now_utc(),
            source,
            level,
            payload,
            ttl_seconds: None,
            visibility: default_visibility(),
        }
    }

    /// Set the time-to-live in seconds (`None` never expires)
    pub fn with_ttl(mut self, ttl_seconds: Option<u64>) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    /// Set the visibility tag
    pub fn with_visibility(mut self, visibility: impl Into<String>) -> Self {
        self.visibility = visibility.into();
        self
    }

    /// Override the creation timestamp (imports and tests).
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn source(&self) -> &MemorySource {
        &self.source
    }

    pub fn session(&self) -> Option<&str> {
        self.source.session.as_deref()
    }

    pub fn level(&self) -> MemoryLevel {
        self.level
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Mutable payload access. Persist changes with `TieredStore::put`.
    pub fn payload_mut(&mut self) -> &mut Payload {
        &mut self.payload
    }

    pub fn ttl_seconds(&self) -> Option<u64> {
        self.ttl_seconds
    }

    pub fn visibility(&self) -> &str {
        &self.visibility
    }

    pub fn set_visibility(&mut self, visibility: impl Into<String>) {
        self.visibility = visibility.into();
    }

    /// Payload type discriminator, if any.
    pub fn kind(&self) -> Option<&str> {
        self.payload.get(TYPE_KEY).and_then(Value::as_str)
    }

    /// Tags read from the payload (`tags` and `meta_tags`), de-duplicated and sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags = BTreeSet::new();
        for key in [TAGS_KEY, LEGACY_TAGS_KEY] {
            if let Some(Value::Array(items)) = self.payload.get(key) {
                tags.extend(items.iter().filter_map(Value::as_str).map(String::from));
            }
        }
        tags.into_iter().collect()
    }

    /// Instant after which the entry is expired. `None` for entries without a
    /// TTL and for TTLs too large to represent.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = i64::try_from(self.ttl_seconds?).ok()?;
        self.created_at.checked_add_signed(Duration::try_seconds(ttl)?)
    }

    /// An entry is live while `now <= created_at + ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| now > expires_at)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(time::now_utc())
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("id", "must not be empty"));
        }
        self.source.validate()
    }

    /// Encode as the persisted JSON document.
    pub fn to_document(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode a persisted JSON document.
    pub fn from_document(document: &str) -> Result<Self> {
        let entry: Self = serde_json::from_str(document)?;
        entry.validate()?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("payload must be an object"),
        }
    }

    fn chat_source() -> MemorySource {
        MemorySource::new(SourceType::Chat, "claude-001").with_session("S1")
    }

    #[test]
    fn test_level_parse() {
        assert_eq!("working".parse::<MemoryLevel>().unwrap(), MemoryLevel::Working);
        let err = "short_term".parse::<MemoryLevel>().unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_source_parse_rejects_unknown_type() {
        assert!(MemorySource::parse("chat", "c1", Some("S1")).is_ok());
        assert!(MemorySource::parse("email", "c1", None).unwrap_err().is_validation());
        assert!(MemorySource::parse("agent", "  ", None).unwrap_err().is_validation());
    }

    #[test]
    fn test_source_key() {
        assert_eq!(chat_source().key(), "chat:claude-001");
        assert_eq!(source_key(SourceType::Api, "tutor-api"), "api:tutor-api");
    }

    #[test]
    fn test_tags_union_and_dedup() {
        let entry = MemoryEntry::new(
            chat_source(),
            MemoryLevel::Working,
            payload(json!({
                "type": "pattern",
                "tags": ["PATTERN", "TECHNICAL.STORAGE", 7],
                "meta_tags": ["PATTERN", "LEGACY"]
            })),
        );
        assert_eq!(entry.tags(), vec!["LEGACY", "PATTERN", "TECHNICAL.STORAGE"]);
        assert_eq!(entry.kind(), Some("pattern"));
    }

    #[test]
    fn test_expiry_boundary() {
        let created = time::parse_timestamp("2025-07-30T12:00:00Z").unwrap();
        let entry = MemoryEntry::new(chat_source(), MemoryLevel::Immediate, Payload::new())
            .with_created_at(created)
            .with_ttl(Some(60));

        let boundary = created + Duration::seconds(60);
        assert!(!entry.is_expired_at(created));
        assert!(!entry.is_expired_at(boundary));
        assert!(entry.is_expired_at(boundary + Duration::microseconds(1)));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let entry = MemoryEntry::new(chat_source(), MemoryLevel::Longterm, Payload::new());
        assert!(entry.expires_at().is_none());
        assert!(!entry.is_expired_at(DateTime::<Utc>::MAX_UTC));

        let huge = entry.clone().with_ttl(Some(u64::MAX));
        assert!(!huge.is_expired());
    }

    #[test]
    fn test_document_layout() {
        let created = time::parse_timestamp("2025-07-30T12:00:00.5Z").unwrap();
        let entry = MemoryEntry::new(chat_source(), MemoryLevel::Immediate, payload(json!({"type": "context"})))
            .with_created_at(created)
            .with_ttl(Some(3600));

        let doc: Value = serde_json::from_str(&entry.to_document().unwrap()).unwrap();
        assert_eq!(doc["timestamp"], "2025-07-30T12:00:00.500000Z");
        assert_eq!(doc["source"]["type"], "chat");
        assert_eq!(doc["source"]["session"], "S1");
        assert_eq!(doc["level"], "immediate");
        assert_eq!(doc["data"]["type"], "context");
        assert_eq!(doc["ttl"], 3600);
        assert_eq!(doc["visibility"], "private");

        let decoded = MemoryEntry::from_document(&entry.to_document().unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_reads_naive_timestamp_document() {
        let doc = r#"{
            "id": "0b5c", "timestamp": "2025-07-30T12:00:00.123456",
            "source": {"type": "api", "id": "tutor-api", "session": null},
            "level": "working", "data": {"meta_tags": ["PATTERN"]}, "ttl": null
        }"#;
        let entry = MemoryEntry::from_document(doc).unwrap();
        let expected = DateTime::parse_from_rfc3339("2025-07-30T12:00:00.123456Z").unwrap();
        assert_eq!(entry.created_at(), expected.with_timezone(&Utc));
        assert_eq!(entry.level(), MemoryLevel::Working);
        assert_eq!(entry.session(), None);
        assert_eq!(entry.visibility(), DEFAULT_VISIBILITY);
        assert_eq!(entry.tags(), vec!["PATTERN"]);

        let bad = doc.replace("\"working\"", "\"archive\"");
        assert!(MemoryEntry::from_document(&bad).is_err());
    }
}

//! Entry data model: the record moved through the memdir pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of entry. Closed set; immutable once the entry is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Signal,
    Metric,
    SystemEvent,
    Trade,
    Observation,
    Error,
}

impl EntryType {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::Metric => "metric",
            Self::SystemEvent => "system_event",
            Self::Trade => "trade",
            Self::Observation => "observation",
            Self::Error => "error",
        }
    }
}

/// Enrichment attached by the organizer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// Ordered keywords describing the entry.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// One-line summary.
    #[serde(default)]
    pub summary: String,
    /// Flags proposed by the enrichment backend, kept verbatim.
    /// May contain tokens outside any known vocabulary.
    #[serde(default)]
    pub suggested_flags: Vec<String>,
}

/// A list the backend may send either as a JSON array or as one
/// comma-separated string. Only the string form is split and trimmed.
#[derive(Deserialize)]
#[serde(untagged)]
enum LooseList {
    Items(Vec<String>),
    Joined(String),
}

impl LooseList {
    fn into_vec(self) -> Vec<String> {
        match self {
            // Arrays are taken verbatim
            Self::Items(items) => items,
            Self::Joined(joined) => joined
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

/// Wire shape of a structured enrichment response.
#[derive(Deserialize)]
struct RawMetadata {
    #[serde(default)]
    keywords: Option<LooseList>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    suggested_flags: Option<LooseList>,
}

impl EntryMetadata {
    /// Interpret a structured enrichment response.
    ///
    /// Accepts `keywords` / `suggested_flags` as arrays or comma-separated
    /// strings. Anything that is not an object of that shape is rejected.
    pub fn from_structured(value: &serde_json::Value) -> Result<Self, String> {
        if !value.is_object() {
            return Err(format!("expected a JSON object, got {}", json_kind(value)));
        }
        let raw: RawMetadata =
            serde_json::from_value(value.clone()).map_err(|e| format!("schema mismatch: {e}"))?;

        Ok(Self {
            keywords: raw.keywords.map(LooseList::into_vec).unwrap_or_default(),
            summary: raw.summary.unwrap_or_default(),
            suggested_flags: raw
                .suggested_flags
                .map(LooseList::into_vec)
                .unwrap_or_default(),
        })
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// A single memory entry.
///
/// Everything except `metadata` is written by the producer and must survive
/// relocation unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID, assigned at creation.
    pub entry_id: Uuid,
    /// Kind of entry.
    pub entry_type: EntryType,
    /// Free-text origin tag.
    pub source_service: String,
    /// When the producer created the entry, if it said.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// Domain-specific payload.
    pub payload: serde_json::Map<String, serde_json::Value>,
    /// Organizer enrichment, absent until processed (and on the degraded path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EntryMetadata>,
    /// Producer fields this crate does not interpret, carried through as-is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl MemoryEntry {
    /// Create a new entry with a fresh ID and the current time.
    pub fn new(
        entry_type: EntryType,
        source_service: impl Into<String>,
        payload: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            entry_type,
            source_service: source_service.into(),
            timestamp: Some(Utc::now()),
            payload,
            metadata: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Create an entry from a `serde_json::json!` object literal.
    ///
    /// Non-object values become an empty payload.
    pub fn from_json(
        entry_type: EntryType,
        source_service: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        let payload = match payload {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self::new(entry_type, source_service, payload)
    }

    /// Builder: attach metadata.
    pub fn with_metadata(mut self, metadata: EntryMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Canonical compact serialization, as embedded in prompts.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// True when the producer-owned fields of `other` match this entry.
    pub fn same_content(&self, other: &MemoryEntry) -> bool {
        self.entry_id == other.entry_id
            && self.entry_type == other.entry_type
            && self.source_service == other.source_service
            && self.timestamp == other.timestamp
            && self.payload == other.payload
            && self.extra == other.extra
    }
}

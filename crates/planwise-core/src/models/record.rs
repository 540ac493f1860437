//! Record model

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::util::now_millis;

/// Field names managed by the sync core rather than by callers.
const RESERVED_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// A record identifier.
///
/// Locally created records get a UUID v7; records pulled from the remote store
/// keep whatever identifier the server assigned (numeric ids are stringified).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Generate a new time-sortable identifier
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Get the string form of this ID
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(id) if !id.trim().is_empty() => Some(Self(id.trim().to_string())),
            Value::Number(id) => Some(Self(id.to_string())),
            _ => None,
        }
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("record id must be a string or a number"))
    }
}

/// A single entity instance (task, category, project or event).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Unique identifier
    pub id: RecordId,
    /// Creation timestamp (Unix ms)
    #[serde(default)]
    pub created_at: i64,
    /// Last modification timestamp (Unix ms), drives reconciliation
    #[serde(default)]
    pub updated_at: i64,
    /// Entity-specific fields
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Build a new record from caller-supplied data.
    ///
    /// An `id` in `data` is kept (so retries of the same logical create target
    /// the same record); otherwise a fresh one is generated. Timestamps are
    /// always assigned here.
    #[must_use]
    pub fn new(mut data: Map<String, Value>) -> Self {
        let id = data
            .get("id")
            .and_then(RecordId::from_value)
            .unwrap_or_else(RecordId::generate);
        for field in RESERVED_FIELDS {
            data.remove(field);
        }

        let now = now_millis();
        Self {
            id,
            created_at: now,
            updated_at: now,
            fields: data,
        }
    }

    /// Parse a record from a JSON object.
    pub fn from_value(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::InvalidInput("record must be a JSON object".into()));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Flat JSON object with the reserved fields included.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = self.fields.clone();
        payload.insert("id".into(), Value::String(self.id.to_string()));
        payload.insert("created_at".into(), Value::from(self.created_at));
        payload.insert("updated_at".into(), Value::from(self.updated_at));
        payload
    }

    /// Read a field, including the reserved ones.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::String(self.id.to_string())),
            "created_at" => Some(Value::from(self.created_at)),
            "updated_at" => Some(Value::from(self.updated_at)),
            _ => self.fields.get(field).cloned(),
        }
    }

    /// Merge `updates` into the entity fields and stamp the modification time.
    ///
    /// `id` and `created_at` cannot be changed through updates.
    pub fn apply_updates(&mut self, updates: &Map<String, Value>, updated_at: i64) {
        for (key, value) in updates {
            if !RESERVED_FIELDS.contains(&key.as_str()) {
                self.fields.insert(key.clone(), value.clone());
            }
        }
        self.updated_at = updated_at;
    }

    /// Whether two versions carry the same entity data.
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id && self.fields == other.fields
    }

    /// Get the title-like field for previews
    pub fn title(&self) -> Option<&str> {
        ["title", "name"]
            .iter()
            .find_map(|key| self.fields.get(*key).and_then(Value::as_str))
    }
}

/// Exact-match field filter (key/value equality only).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter(BTreeMap<String, Value>);

impl Filter {
    /// An empty filter matching every record
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add an equality condition
    #[must_use]
    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(field.into(), value.into());
        self
    }

    /// Whether the record satisfies every condition
    pub fn matches(&self, record: &Record) -> bool {
        self.0
            .iter()
            .all(|(field, expected)| record.get(field).as_ref() == Some(expected))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

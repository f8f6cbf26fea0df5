use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured fact document: field name -> JSON value
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Stable fact identifier
///
/// Generated once by the store core and never reissued, even after the
/// fact is deleted or its insertion rolled back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactId(String);

impl FactId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key used for per-fact stripe locking
    pub fn lock_key(&self) -> Vec<u8> {
        format!("fact:{}", self.0).into_bytes()
    }
}

impl fmt::Display for FactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for FactId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for FactId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl AsRef<str> for FactId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A single versioned unit of structured state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,

    /// Type name bound to a schema registration
    #[serde(rename = "type")]
    pub fact_type: String,

    pub payload: Payload,

    /// Where the fact came from (document, tool, conversation turn...)
    #[serde(default)]
    pub source: Option<String>,

    /// Owning session; `None` means global scope
    #[serde(default)]
    pub session_id: Option<String>,

    /// Who produced the latest change
    #[serde(default)]
    pub actor: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fact {
    /// Create a fact with a freshly generated id
    pub fn new(fact_type: impl Into<String>, payload: Payload) -> Self {
        let now = Utc::now();
        Self {
            id: FactId::generate(),
            fact_type: fact_type.into(),
            payload,
            source: None,
            session_id: None,
            actor: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Build a fact from a JSON object value
    ///
    /// Non-object values are rejected since payloads are field mappings.
    pub fn from_json(
        fact_type: impl Into<String>,
        value: serde_json::Value,
    ) -> crate::Result<Self> {
        let fact_type = fact_type.into();
        match value {
            serde_json::Value::Object(payload) => Ok(Self::new(fact_type, payload)),
            other => Err(crate::MemstateError::validation(
                fact_type,
                format!("payload must be a JSON object, got {}", json_kind(&other)),
            )),
        }
    }

    pub fn with_id(mut self, id: impl Into<FactId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Read a top-level payload field
    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.payload.get(name)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

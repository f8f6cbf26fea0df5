use crate::payload;
use crate::types::fact::{Fact, FactId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Filter over current facts
///
/// Filters are dotted payload paths compared for equality, e.g.
/// `"address.city" => "Paris"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FactQuery {
    #[serde(default)]
    pub fact_type: Option<String>,

    #[serde(default)]
    pub filters: BTreeMap<String, Value>,

    #[serde(default)]
    pub session_id: Option<String>,
}

impl FactQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(fact_type: impl Into<String>) -> Self {
        Self {
            fact_type: Some(fact_type.into()),
            ..Self::default()
        }
    }

    pub fn filter(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(path.into(), value.into());
        self
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Evaluate this query against a fact
    pub fn matches(&self, fact: &Fact) -> bool {
        if let Some(fact_type) = &self.fact_type {
            if &fact.fact_type != fact_type {
                return false;
            }
        }
        if let Some(session) = &self.session_id {
            if fact.session_id.as_ref() != Some(session) {
                return false;
            }
        }
        self.filters
            .iter()
            .all(|(path, expected)| payload::lookup_path(&fact.payload, path) == Some(expected))
    }
}

/// Semantic search request forwarded to search-capable hooks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    #[serde(default)]
    pub filters: BTreeMap<String, Value>,
    #[serde(default)]
    pub score_threshold: Option<f32>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: 5,
            filters: BTreeMap::new(),
            score_threshold: None,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn filter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = Some(threshold);
        self
    }
}

/// Raw hit returned by a secondary index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub fact_id: FactId,
    pub score: f32,
}

/// Search hit resolved against the primary store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredFact {
    pub fact: Fact,
    pub score: f32,
}

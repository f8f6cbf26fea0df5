use memstate_core::payload::lookup_path;
use memstate_core::{Fact, FactId, FactQuery, LogEntry, MemstateError, Result, Sequence, TxId};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Facts, type index and log, guarded together by the handle's lock
#[derive(Default)]
pub(crate) struct Tables {
    facts: HashMap<FactId, Fact>,
    by_type: HashMap<String, BTreeSet<FactId>>,
    log: BTreeMap<Sequence, LogEntry>,
    tx_index: HashMap<TxId, Sequence>,
    high_water: Sequence,
}

impl Tables {
    pub(crate) fn insert(&mut self, fact: &Fact) -> Result<FactId> {
        if self.facts.contains_key(&fact.id) {
            return Err(MemstateError::Storage(format!(
                "fact {} already exists",
                fact.id
            )));
        }
        self.by_type
            .entry(fact.fact_type.clone())
            .or_default()
            .insert(fact.id.clone());
        self.facts.insert(fact.id.clone(), fact.clone());
        Ok(fact.id.clone())
    }

    pub(crate) fn update(&mut self, fact: &Fact) -> Result<()> {
        let previous_type = match self.facts.get(&fact.id) {
            Some(existing) => existing.fact_type.clone(),
            None => return Err(MemstateError::NotFound(fact.id.to_string())),
        };
        if previous_type != fact.fact_type {
            self.unindex(&previous_type, &fact.id);
            self.by_type
                .entry(fact.fact_type.clone())
                .or_default()
                .insert(fact.id.clone());
        }
        self.facts.insert(fact.id.clone(), fact.clone());
        Ok(())
    }

    pub(crate) fn delete(&mut self, id: &FactId) {
        if let Some(fact) = self.facts.remove(id) {
            self.unindex(&fact.fact_type, id);
        }
    }

    fn unindex(&mut self, fact_type: &str, id: &FactId) {
        if let Some(ids) = self.by_type.get_mut(fact_type) {
            ids.remove(id);
            if ids.is_empty() {
                self.by_type.remove(fact_type);
            }
        }
    }

    pub(crate) fn get(&self, id: &FactId) -> Option<Fact> {
        self.facts.get(id).cloned()
    }

    pub(crate) fn find_by_field(&self, fact_type: &str, field: &str, value: &Value) -> Option<FactId> {
        self.by_type.get(fact_type)?.iter().find_map(|id| {
            let fact = self.facts.get(id)?;
            (lookup_path(&fact.payload, field) == Some(value)).then(|| id.clone())
        })
    }

    /// Matching facts ordered by creation time, then id
    pub(crate) fn list_current(&self, query: &FactQuery) -> Vec<Fact> {
        let candidates: Vec<&Fact> = match &query.fact_type {
            Some(fact_type) => match self.by_type.get(fact_type) {
                Some(ids) => ids.iter().filter_map(|id| self.facts.get(id)).collect(),
                None => Vec::new(),
            },
            None => self.facts.values().collect(),
        };
        let mut out: Vec<Fact> = candidates
            .into_iter()
            .filter(|fact| query.matches(fact))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }

    pub(crate) fn append_log(&mut self, entry: &LogEntry) -> Result<()> {
        if self.tx_index.contains_key(&entry.tx_id) {
            return Err(MemstateError::Storage(format!(
                "log entry {} already exists",
                entry.tx_id
            )));
        }
        if self.log.contains_key(&entry.sequence) {
            return Err(MemstateError::Storage(format!(
                "sequence {} already logged",
                entry.sequence
            )));
        }
        self.tx_index.insert(entry.tx_id.clone(), entry.sequence);
        self.log.insert(entry.sequence, entry.clone());
        self.high_water = self.high_water.max(entry.sequence);
        Ok(())
    }

    pub(crate) fn list_log(&self, session_id: Option<&str>, limit: usize) -> Vec<LogEntry> {
        self.log
            .values()
            .rev()
            .filter(|entry| entry.in_scope(session_id))
            .take(limit)
            .cloned()
            .collect()
    }

    pub(crate) fn remove_log(&mut self, tx_id: &TxId) {
        if let Some(seq) = self.tx_index.remove(tx_id) {
            self.log.remove(&seq);
        }
    }

    pub(crate) fn contains_log(&self, tx_id: &TxId) -> bool {
        self.tx_index.contains_key(tx_id)
    }

    pub(crate) fn max_sequence(&self) -> Sequence {
        self.high_water
    }

    pub(crate) fn fact_count(&self) -> usize {
        self.facts.len()
    }

    pub(crate) fn log_len(&self) -> usize {
        self.log.len()
    }
}

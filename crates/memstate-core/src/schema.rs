//! Schema registry and per-type constraints
//!
//! Types are opt-in: a type with no registration bypasses validation and
//! constraint enforcement entirely.

use crate::error::{MemstateError, Result};
use crate::traits::{TypedValidator, Validator};
use crate::types::Payload;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

/// Per-type write rules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Constraint {
    /// Payload field that must be unique among live facts of the type
    ///
    /// A would-be duplicate INSERT becomes an UPDATE of the existing fact.
    #[serde(default)]
    pub singleton_key: Option<String>,

    /// Forbid in-place update or delete once a fact exists
    #[serde(default)]
    pub immutable: bool,
}

impl Constraint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn singleton(key: impl Into<String>) -> Self {
        Self {
            singleton_key: Some(key.into()),
            immutable: false,
        }
    }

    pub fn immutable() -> Self {
        Self {
            singleton_key: None,
            immutable: true,
        }
    }

    pub fn with_singleton_key(mut self, key: impl Into<String>) -> Self {
        self.singleton_key = Some(key.into());
        self
    }

    pub fn with_immutable(mut self, immutable: bool) -> Self {
        self.immutable = immutable;
        self
    }
}

/// Everything registered for one type name
#[derive(Clone, Default)]
pub struct Resolved {
    pub validator: Option<Arc<dyn Validator>>,
    pub constraint: Option<Constraint>,
}

impl Resolved {
    /// Validate a payload, or pass it through if no validator is registered
    pub fn validate(&self, fact_type: &str, payload: &Payload) -> Result<Payload> {
        match &self.validator {
            Some(validator) => validator.validate(fact_type, payload),
            None => Ok(payload.clone()),
        }
    }

    pub fn singleton_key(&self) -> Option<&str> {
        self.constraint
            .as_ref()
            .and_then(|c| c.singleton_key.as_deref())
    }

    pub fn is_immutable(&self) -> bool {
        self.constraint.as_ref().map(|c| c.immutable).unwrap_or(false)
    }

    /// Type-level lock key for singleton types
    ///
    /// Writers on a singleton type serialize on this key so two concurrent
    /// commits cannot both miss the singleton lookup.
    pub fn type_lock_key(&self, fact_type: &str) -> Option<Vec<u8>> {
        self.singleton_key()
            .map(|_| format!("type:{}", fact_type).into_bytes())
    }
}

#[derive(Default)]
struct RegistryInner {
    types: HashMap<String, Resolved>,
    models: HashMap<TypeId, String>,
}

/// Maps type names to a validator and optional constraint
///
/// Registration is an idempotent overwrite (last registration wins) and is
/// safe to call while stores are serving writes: each write resolves its
/// type once, up front.
#[derive(Default)]
pub struct SchemaRegistry {
    inner: RwLock<RegistryInner>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a validator and optional constraint for a type name
    pub fn register(
        &self,
        fact_type: impl Into<String>,
        validator: Arc<dyn Validator>,
        constraint: Option<Constraint>,
    ) {
        let fact_type = fact_type.into();
        tracing::debug!(fact_type = %fact_type, ?constraint, "registering schema");
        self.inner.write().types.insert(
            fact_type,
            Resolved {
                validator: Some(validator),
                constraint,
            },
        );
    }

    /// Register only a constraint (no payload validation)
    pub fn register_constraint(&self, fact_type: impl Into<String>, constraint: Constraint) {
        let fact_type = fact_type.into();
        let mut inner = self.inner.write();
        let entry = inner.types.entry(fact_type).or_default();
        entry.constraint = Some(constraint);
    }

    /// Register a serde model as the schema of a type name
    ///
    /// The model type can later be committed directly with `commit_model`.
    pub fn register_model<T>(&self, fact_type: impl Into<String>, constraint: Option<Constraint>)
    where
        T: DeserializeOwned + Serialize + 'static,
    {
        let fact_type = fact_type.into();
        self.register(
            fact_type.clone(),
            Arc::new(TypedValidator::<T>::new()),
            constraint,
        );
        let mut inner = self.inner.write();
        // a model maps to one name; drop any stale mapping of this name to another model
        inner.models.retain(|_, name| name != &fact_type);
        inner.models.insert(TypeId::of::<T>(), fact_type);
    }

    /// Look up the validator and constraint for a type name
    pub fn resolve(&self, fact_type: &str) -> Resolved {
        self.inner
            .read()
            .types
            .get(fact_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Reverse lookup: type name registered for model `T`
    pub fn type_of_model<T: 'static>(&self) -> Result<String> {
        self.inner
            .read()
            .models
            .get(&TypeId::of::<T>())
            .cloned()
            .ok_or_else(|| MemstateError::UnregisteredModel(std::any::type_name::<T>().to_string()))
    }

    pub fn is_registered(&self, fact_type: &str) -> bool {
        self.inner.read().types.contains_key(fact_type)
    }

    /// All registered type names
    pub fn types(&self) -> Vec<String> {
        self.inner.read().types.keys().cloned().collect()
    }
}

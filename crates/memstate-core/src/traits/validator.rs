use crate::error::{MemstateError, Result};
use crate::types::Payload;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Per-type payload check
///
/// Returns the normalized payload (defaults filled in, unknown fields
/// dropped, values coerced) or a validation failure.
pub trait Validator: Send + Sync {
    fn validate(&self, fact_type: &str, payload: &Payload) -> Result<Payload>;
}

impl<F> Validator for F
where
    F: Fn(&Payload) -> std::result::Result<Payload, String> + Send + Sync,
{
    fn validate(&self, fact_type: &str, payload: &Payload) -> Result<Payload> {
        self(payload).map_err(|message| MemstateError::validation(fact_type, message))
    }
}

/// Validator backed by a serde model
///
/// The payload is deserialized into `T` and serialized back, so the stored
/// payload is always the model's canonical shape.
pub struct TypedValidator<T> {
    _model: PhantomData<fn() -> T>,
}

impl<T> TypedValidator<T> {
    pub fn new() -> Self {
        Self {
            _model: PhantomData,
        }
    }
}

impl<T> Default for TypedValidator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Validator for TypedValidator<T>
where
    T: DeserializeOwned + Serialize,
{
    fn validate(&self, fact_type: &str, payload: &Payload) -> Result<Payload> {
        let model: T = serde_json::from_value(serde_json::Value::Object(payload.clone()))
            .map_err(|e| MemstateError::validation(fact_type, e.to_string()))?;
        match serde_json::to_value(&model)? {
            serde_json::Value::Object(normalized) => Ok(normalized),
            _ => Err(MemstateError::validation(
                fact_type,
                "model does not serialize to an object",
            )),
        }
    }
}

//! Payload helpers shared by the store core and adapters

use crate::types::Payload;
use serde_json::Value;

/// Resolve a dotted path (`"address.city"`) inside a payload
///
/// Returns `None` as soon as a segment is missing or a non-object value
/// is traversed.
pub fn lookup_path<'a>(payload: &'a Payload, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = payload.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Shallow merge: top-level keys of `patch` replace those of `base`
pub fn merge(base: &Payload, patch: &Payload) -> Payload {
    let mut merged = base.clone();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

//! Structural diff of draft rows.

use std::collections::BTreeMap;
use strand_core::Value;

/// Fields of `after` that differ from `before`.
///
/// Objects are compared field by field, recursively; a removed field is
/// recorded as `Null`. Arrays and scalars are compared by value and
/// recorded whole. Returns `None` when nothing changed.
pub fn diff(before: &Value, after: &Value) -> Option<Value> {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut changes = BTreeMap::new();
            for (field, value) in new {
                match old.get(field) {
                    Some(previous) => {
                        if let Some(change) = diff(previous, value) {
                            changes.insert(field.clone(), change);
                        }
                    }
                    None => {
                        changes.insert(field.clone(), value.clone());
                    }
                }
            }
            for field in old.keys() {
                if !new.contains_key(field) {
                    changes.insert(field.clone(), Value::Null);
                }
            }
            (!changes.is_empty()).then_some(Value::Object(changes))
        }
        _ if before == after => None,
        _ => Some(after.clone()),
    }
}

/// Overlays the changes `next` onto `base`.
pub fn merge_changes(base: &Value, next: &Value) -> Value {
    match (base, next) {
        (Value::Object(base), Value::Object(next)) => {
            let mut merged = base.clone();
            for (field, value) in next {
                let combined = match merged.get(field) {
                    Some(existing) => merge_changes(existing, value),
                    None => value.clone(),
                };
                merged.insert(field.clone(), combined);
            }
            Value::Object(merged)
        }
        (_, next) => next.clone(),
    }
}

/// True when `changes` records no field.
pub fn is_empty(changes: &Value) -> bool {
    matches!(changes, Value::Object(fields) if fields.is_empty())
}

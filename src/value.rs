//! The record shape shared by every module: a plain JSON-like dictionary.
//!
//! Records never leave the process and are never written to disk, but
//! `serde_json::Value` is still the natural representation for a
//! dictionary of primitives, arrays, and dates -- an arbitrary
//! JSON-serializable payload that needs to cross the boundary between
//! stored data and caller-facing attribute maps.
//!
use serde_json::{Map, Value};

/// A single stored record: an ordered dictionary of attribute names to
/// values, always carrying an `"id"` key once saved.
///
pub type Record = Map<String, Value>;

/// Merge `patch` into `record` shallowly: every key in `patch` overwrites
/// the corresponding key in `record` (or is inserted if absent). Nested
/// objects/arrays are replaced wholesale, never deep-merged.
///
pub fn merge_shallow(record: &mut Record, patch: &Record) {
    for (k, v) in patch {
        record.insert(k.clone(), v.clone());
    }
}

/// Read the `"id"` attribute, if present and not `null`.
///
pub fn record_id(record: &Record) -> Option<Value> {
    record.get("id").cloned().filter(|v| !v.is_null())
}

/// Coerce a scalar id `Value` into its canonical string form, used as the
/// [`DbCollection`](../db_collection/struct.DbCollection.html) lookup key
/// regardless of whether the identity manager produces strings or
/// numbers.
///
pub fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_and_inserts() {
        let mut record = json!({"id": 1, "name": "a", "age": 20})
            .as_object()
            .unwrap()
            .clone();
        let patch = json!({"age": 21, "city": "X"}).as_object().unwrap().clone();
        merge_shallow(&mut record, &patch);
        assert_eq!(record.get("name").unwrap(), "a");
        assert_eq!(record.get("age").unwrap(), 21);
        assert_eq!(record.get("city").unwrap(), "X");
    }

    #[test]
    fn id_key_normalizes_numbers_and_strings() {
        assert_eq!(id_key(&json!(42)), "42");
        assert_eq!(id_key(&json!("42")), "42");
    }

    #[test]
    fn record_id_is_none_for_null() {
        let record = json!({"id": null}).as_object().unwrap().clone();
        assert_eq!(record_id(&record), None);
    }
}

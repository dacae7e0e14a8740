//! Canonical JSON serialization used as the HMAC pre-image.

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use serde_json::Value;

/// Serializes a `Value` with keys sorted recursively, so the output stays
/// byte-stable even if the underlying map implementation preserves insertion
/// order. Nested objects are sorted too, not just the top level.
struct Canonical<'a>(&'a Value);

impl Serialize for Canonical<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|(a, _), (b, _)| a.cmp(b));
                let mut out = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    out.serialize_entry(key, &Canonical(value))?;
                }
                out.end()
            }
            Value::Array(items) => {
                let mut out = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    out.serialize_element(&Canonical(item))?;
                }
                out.end()
            }
            other => other.serialize(serializer),
        }
    }
}

/// Produce canonical JSON: sorted keys, no whitespace, excluded keys removed.
///
/// Only top-level keys are excluded; nesting is sorted all the way down.
pub fn canonicalize(payload: &Value, exclude_keys: &[&str]) -> Result<String, serde_json::Error> {
    let pruned = match payload {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !exclude_keys.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        ),
        other => other.clone(),
    };
    serde_json::to_string(&Canonical(&pruned))
}

//! Node form decoding

use std::collections::HashMap;

/// Decoded form values; entries that were not valid JSON are `Null`
pub type FormValues = HashMap<String, serde_json::Value>;

/// Decode a node form whose entries are JSON-encoded strings
///
/// Undecodable entries become `Null` instead of failing the whole form, so
/// a single corrupted field only invalidates the node that owns it.
pub fn parse_node_form(form: &HashMap<String, String>) -> FormValues {
    form.iter()
        .map(|(name, raw)| {
            let value = serde_json::from_str(raw).unwrap_or_else(|err| {
                log::debug!("Form value '{}' is not valid JSON: {}", name, err);
                serde_json::Value::Null
            });
            (name.clone(), value)
        })
        .collect()
}

/// Read a string form field, treating `Null` and non-strings as missing
pub fn form_str<'a>(form: &'a FormValues, name: &str) -> Option<&'a str> {
    form.get(name).and_then(|v| v.as_str())
}

/// Read a numeric form field
pub fn form_f64(form: &FormValues, name: &str) -> Option<f64> {
    form.get(name).and_then(|v| v.as_f64())
}

/// Read a boolean form field
pub fn form_bool(form: &FormValues, name: &str) -> Option<bool> {
    form.get(name).and_then(|v| v.as_bool())
}

//! Flat key/value view of an event payload
//!
//! Application payloads are shallow objects. Nested objects are flattened to
//! dotted keys and arrays are kept as their JSON text:
//!
//! ```text
//! {"booth_name":"A","location":{"lat":1.5,"lng":2},"tags":["x","y"]}
//!
//! booth_name   -> A
//! location.lat -> 1.5
//! location.lng -> 2
//! tags         -> ["x","y"]
//! ```

use std::collections::BTreeMap;

use serde_json::Value;

/// Flattened event arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPayload {
    fields: BTreeMap<String, String>,
}

impl EventPayload {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flatten a decoded JSON value; anything but an object yields an empty payload
    pub fn from_value(value: &Value) -> Self {
        let mut fields = BTreeMap::new();
        if let Value::Object(map) = value {
            flatten_into(&mut fields, "", map);
        }
        Self { fields }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key)?.trim().parse().ok()
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        let raw = self.get(key)?.trim();
        raw.parse()
            .ok()
            .or_else(|| raw.parse::<f64>().ok().map(|f| f as i64))
    }

    /// `true`/`1` are true, `false`/`0` are false
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)?.trim() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn flatten_into(out: &mut BTreeMap<String, String>, prefix: &str, map: &serde_json::Map<String, Value>) {
    for (key, value) in map {
        let full_key = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            Value::Object(nested) => flatten_into(out, &full_key, nested),
            Value::String(s) => {
                out.insert(full_key, s.clone());
            }
            other => {
                out.insert(full_key, other.to_string());
            }
        }
    }
}

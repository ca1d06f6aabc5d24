use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The `is`/`can` flags and special-role labels for one request.
///
/// Every flag is a plain `bool`; a flag that was never set reads as `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    #[serde(default)]
    pub is: BTreeMap<String, bool>,

    #[serde(default)]
    pub can: BTreeMap<String, bool>,

    #[serde(default)]
    pub special: Vec<String>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is(&self, flag: &str) -> bool {
        self.is.get(flag).copied().unwrap_or(false)
    }

    pub fn can(&self, flag: &str) -> bool {
        self.can.get(flag).copied().unwrap_or(false)
    }

    pub fn set_is(&mut self, flag: &str, value: bool) {
        self.is.insert(flag.to_string(), value);
    }

    pub fn set_can(&mut self, flag: &str, value: bool) {
        self.can.insert(flag.to_string(), value);
    }

    pub fn has_special(&self, label: &str) -> bool {
        self.special.iter().any(|s| s == label)
    }

    /// Build a set from a loosely-typed permission object.
    ///
    /// Values under `is` and `can` are coerced with JavaScript truthiness.
    /// String entries of `special` are kept; anything else is ignored.
    pub fn from_loose(value: &Value) -> Self {
        let coerce = |section: &str| -> BTreeMap<String, bool> {
            value
                .get(section)
                .and_then(Value::as_object)
                .map(|map| map.iter().map(|(k, v)| (k.clone(), truthy(v))).collect())
                .unwrap_or_default()
        };

        let special = value
            .get("special")
            .and_then(Value::as_array)
            .map(|labels| {
                labels
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            is: coerce("is"),
            can: coerce("can"),
            special,
        }
    }
}

/// JavaScript truthiness of a JSON value.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

//! Best-effort numeric parameters.
//!
//! Params never fail a call. A missing, empty or unparseable payload keeps
//! the fallback value; anything numeric is clamped into range.

use serde_json::{Map, Value, json};

/// One numeric field of a node's params payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberParam {
    pub key: &'static str,
    pub description: &'static str,
    pub default: f64,
    pub minimum: f64,
    pub maximum: f64,
    /// Whether the value may change on a running instance.
    pub tunable: bool,
}

impl NumberParam {
    pub const fn new(key: &'static str, default: f64, minimum: f64, maximum: f64) -> Self {
        Self { key, description: "", default, minimum, maximum, tunable: true }
    }

    pub const fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    pub const fn tunable(mut self, tunable: bool) -> Self {
        self.tunable = tunable;
        self
    }

    /// Clamp into `[minimum, maximum]`. NaN becomes the default.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.default;
        }
        value.clamp(self.minimum, self.maximum)
    }

    /// The value a payload asks for, or `fallback` when it asks for nothing usable.
    ///
    /// Pass the default at creation and the current value on update, so a
    /// malformed update leaves the instance unchanged.
    pub fn resolve(&self, payload: Option<&str>, fallback: f64) -> f64 {
        match payload.filter(|p| !p.trim().is_empty()).and_then(|p| extract_number(p, self.key)) {
            Some(value) if !value.is_nan() => self.clamp(value),
            _ => fallback,
        }
    }

    /// Value at creation time.
    pub fn initial(&self, payload: Option<&str>) -> f64 {
        self.resolve(payload, self.default)
    }

    pub fn schema_fragment(&self) -> Value {
        let mut fragment = Map::new();
        fragment.insert("type".into(), json!("number"));
        if !self.description.is_empty() {
            fragment.insert("description".into(), json!(self.description));
        }
        fragment.insert("default".into(), json!(self.default));
        fragment.insert("minimum".into(), json!(self.minimum));
        fragment.insert("maximum".into(), json!(self.maximum));
        fragment.insert("tunable".into(), json!(self.tunable));
        Value::Object(fragment)
    }
}

/// Render the `{"type":"object","properties":{...}}` schema for a set of params.
pub fn param_schema(params: &[NumberParam]) -> String {
    let properties: Map<String, Value> = params
        .iter()
        .map(|param| (param.key.to_string(), param.schema_fragment()))
        .collect();
    json!({ "type": "object", "properties": properties }).to_string()
}

/// Read one numeric field out of a params payload.
///
/// Valid JSON: the key's value if it is a number or a numeric string.
/// Anything else: look for `"key"`, skip whitespace and a `:`, and take the
/// longest prefix that parses as a float.
pub fn extract_number(payload: &str, key: &str) -> Option<f64> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => match map.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        },
        Ok(_) => None,
        Err(_) => scan_number(payload, key),
    }
}

fn scan_number(payload: &str, key: &str) -> Option<f64> {
    let needle = format!("\"{key}\"");
    let start = payload.find(&needle)? + needle.len();
    let rest = payload[start..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let rest = rest.strip_prefix('"').unwrap_or(rest);

    let candidate_len = rest
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;

    (1..=candidate_len)
        .rev()
        .find_map(|len| rest[..len].parse::<f64>().ok())
}

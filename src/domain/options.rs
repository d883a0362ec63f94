//! A read-only view of the persisted options, taken once per request.
//!
//! Values are whatever JSON the options store holds. Accessors coerce them
//! leniently the way a site owner would expect a settings form to behave:
//! `1`, `"1"`, `true` and `"on"` all count as enabled. Anything that cannot be
//! read yields `None` so callers fall back to their documented default.

use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsSnapshot {
    values: BTreeMap<String, Value>,
}

impl OptionsSnapshot {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.values
    }

    pub fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(coerce_flag)
    }

    pub fn text(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(value) => Some(value.clone()),
            Value::Number(value) => Some(value.to_string()),
            Value::Bool(value) => Some(if *value { "1" } else { "0" }.to_string()),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn unsigned(&self, key: &str) -> Option<u64> {
        match self.get(key)? {
            Value::Number(value) => value.as_u64(),
            Value::String(value) => value.trim().parse().ok(),
            _ => None,
        }
    }
}

impl FromIterator<(String, Value)> for OptionsSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Lenient truthiness for a stored option value.
pub fn coerce_flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::Number(number) => number.as_f64().map(|n| n != 0.0),
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "yes" => Some(true),
            "0" | "false" | "off" | "no" | "" => Some(false),
            _ => None,
        },
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Split a comma or newline separated option into trimmed, non-empty entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', '\n', '\r'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn snapshot(entries: &[(&str, Value)]) -> OptionsSnapshot {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn flags_accept_form_style_values() {
        let options = snapshot(&[
            ("a", json!(1)),
            ("b", json!("1")),
            ("c", json!(true)),
            ("d", json!("on")),
            ("e", json!("0")),
            ("f", json!("")),
            ("g", json!("maybe")),
        ]);
        assert_eq!(options.flag("a"), Some(true));
        assert_eq!(options.flag("b"), Some(true));
        assert_eq!(options.flag("c"), Some(true));
        assert_eq!(options.flag("d"), Some(true));
        assert_eq!(options.flag("e"), Some(false));
        assert_eq!(options.flag("f"), Some(false));
        assert_eq!(options.flag("g"), None);
        assert_eq!(options.flag("missing"), None);
    }

    #[test]
    fn unsigned_reads_numbers_and_numeric_strings() {
        let options = snapshot(&[
            ("n", json!(3600)),
            ("s", json!(" 120 ")),
            ("neg", json!(-5)),
            ("junk", json!("soon")),
        ]);
        assert_eq!(options.unsigned("n"), Some(3600));
        assert_eq!(options.unsigned("s"), Some(120));
        assert_eq!(options.unsigned("neg"), None);
        assert_eq!(options.unsigned("junk"), None);
    }

    #[test]
    fn split_list_handles_commas_and_newlines() {
        let entries = split_list("jquery.js, slider.js\n\n  /cart ,");
        assert_eq!(entries, vec!["jquery.js", "slider.js", "/cart"]);
    }
}

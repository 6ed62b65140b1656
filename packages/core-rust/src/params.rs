//! Structured parameter mapping handed to handlers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::fault::Fault;
use crate::protocol::Protocol;

/// Parameters of a resolved operation, keyed by the protocol's native names.
///
/// Form protocols produce nested maps and lists of strings (see
/// [`crate::form`]); JSON protocols produce the body document as-is. Shape
/// validation coerces declared scalar fields to their native JSON types
/// before handlers see them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Params(Map<String, Value>);

impl Params {
    /// Creates an empty parameter mapping.
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps a JSON object. Returns `None` for any other JSON value.
    #[must_use]
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            Value::Null => Some(Self::new()),
            _ => None,
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.0.get_mut(name)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Inserts a value, returning the previous one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(name.into(), value.into())
    }

    /// Removes a parameter, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.0.shift_remove(name)
    }

    /// Copies every entry of `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: Params) {
        for (key, value) in other.0 {
            self.0.insert(key, value);
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// String value of a parameter, if present and a string.
    #[must_use]
    pub fn str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// String value of a required parameter.
    ///
    /// # Errors
    ///
    /// Returns a `MissingParameter`-style fault for `protocol` when the
    /// parameter is absent or empty.
    pub fn required_str(&self, protocol: Protocol, name: &str) -> Result<&str, Fault> {
        match self.str(name) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(Fault::missing_parameter(protocol, name)),
        }
    }

    /// Integer value, accepting JSON numbers and numeric strings.
    #[must_use]
    pub fn i64(&self, name: &str) -> Option<i64> {
        match self.0.get(name)? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Boolean value, accepting JSON booleans and `"true"`/`"false"` strings.
    #[must_use]
    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.0.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => parse_bool(s),
            _ => None,
        }
    }

    /// List value. Missing parameters and non-lists yield an empty slice.
    #[must_use]
    pub fn list(&self, name: &str) -> &[Value] {
        match self.0.get(name) {
            Some(Value::Array(items)) => items,
            _ => &[],
        }
    }

    /// String members of a list parameter; non-string members are skipped.
    #[must_use]
    pub fn strings(&self, name: &str) -> Vec<String> {
        self.list(name)
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    /// Nested structure parameter.
    #[must_use]
    pub fn object(&self, name: &str) -> Option<&Map<String, Value>> {
        self.0.get(name).and_then(Value::as_object)
    }

    #[must_use]
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

pub(crate) fn parse_bool(s: &str) -> Option<bool> {
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn params(value: Value) -> Params {
        Params::from_value(value).unwrap()
    }

    #[test]
    fn from_value_rejects_non_objects() {
        assert!(Params::from_value(json!([1, 2])).is_none());
        assert!(Params::from_value(json!("x")).is_none());
        assert!(Params::from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn integer_accessor_accepts_numeric_strings() {
        let p = params(json!({"MinSize": "2", "MaxSize": 4, "Name": "x"}));
        assert_eq!(p.i64("MinSize"), Some(2));
        assert_eq!(p.i64("MaxSize"), Some(4));
        assert_eq!(p.i64("Name"), None);
        assert_eq!(p.i64("Absent"), None);
    }

    #[test]
    fn bool_accessor_is_case_insensitive() {
        let p = params(json!({"a": "TRUE", "b": false, "c": "yes"}));
        assert_eq!(p.bool("a"), Some(true));
        assert_eq!(p.bool("b"), Some(false));
        assert_eq!(p.bool("c"), None);
    }

    #[test]
    fn required_str_rejects_missing_and_empty() {
        let p = params(json!({"Name": "", "Other": "ok"}));
        assert_eq!(p.required_str(Protocol::Query, "Other").unwrap(), "ok");
        let err = p.required_str(Protocol::Query, "Name").unwrap_err();
        assert_eq!(err.code, "MissingParameter");
        assert!(p.required_str(Protocol::Json, "Absent").is_err());
    }

    #[test]
    fn strings_skips_non_strings() {
        let p = params(json!({"Zones": ["a", 1, "b"]}));
        assert_eq!(p.strings("Zones"), vec!["a".to_string(), "b".to_string()]);
        assert!(p.strings("Missing").is_empty());
    }

    #[test]
    fn merge_overwrites_duplicates() {
        let mut a = params(json!({"x": 1, "y": 2}));
        a.merge(params(json!({"y": 3, "z": 4})));
        assert_eq!(a.into_value(), json!({"x": 1, "y": 3, "z": 4}));
    }
}

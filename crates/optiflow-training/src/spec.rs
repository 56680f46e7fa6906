//! Tagged component specifications.
//!
//! Every component that is built by name (optimizers, hooks, datasets, runners)
//! is described by a mapping with a `type` entry and arbitrary options.

use crate::error::{TrainingError, TrainingResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding the component name inside a spec.
pub const TYPE_KEY: &str = "type";

/// A `type` name plus free-form options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentSpec(Map<String, Value>);

impl ComponentSpec {
    #[must_use]
    pub fn new() -> Self {
        Self(Map::new())
    }

    #[must_use]
    pub fn with_type(type_name: impl Into<String>) -> Self {
        let mut map = Map::new();
        map.insert(TYPE_KEY.to_string(), Value::String(type_name.into()));
        Self(map)
    }

    #[must_use]
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// The component name, if the spec carries a string `type`.
    pub fn type_name(&self) -> Option<&str> {
        self.0.get(TYPE_KEY).and_then(Value::as_str)
    }

    pub fn has_type(&self) -> bool {
        self.0.contains_key(TYPE_KEY)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Insert `value` under `key` only when the key is absent.
    pub fn set_default(&mut self, key: &str, value: Value) {
        self.0.entry(key.to_string()).or_insert(value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn options(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Merge two specs whose keys must not overlap.
    pub fn merge_disjoint(&self, other: &Self) -> TrainingResult<Self> {
        let mut merged = self.0.clone();
        for (key, value) in &other.0 {
            if merged.contains_key(key) {
                return Err(TrainingError::InvalidConfig(format!(
                    "option `{key}` is given more than once"
                )));
            }
            merged.insert(key.clone(), value.clone());
        }
        Ok(Self(merged))
    }

    /// Deserialize the options into a typed config.
    pub fn parse<T: DeserializeOwned>(&self) -> TrainingResult<T> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }
}

impl From<Map<String, Value>> for ComponentSpec {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TryFrom<Value> for ComponentSpec {
    type Error = TrainingError;

    fn try_from(value: Value) -> TrainingResult<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(TrainingError::InvalidConfig(format!(
                "component spec must be a mapping, got {}",
                json_kind(&other)
            ))),
        }
    }
}

/// Human-readable name of a JSON value's kind, for error messages.
pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_name_and_set_default() {
        let mut spec = ComponentSpec::new();
        assert!(spec.type_name().is_none());
        spec.set_default(TYPE_KEY, json!("OptimizerHook"));
        spec.set_default(TYPE_KEY, json!("Other"));
        assert_eq!(spec.type_name(), Some("OptimizerHook"));
    }

    #[test]
    fn test_merge_disjoint_rejects_duplicates() {
        let a = ComponentSpec::try_from(json!({"grad_clip": null})).unwrap();
        let b = ComponentSpec::try_from(json!({"loss_scale": 512.0})).unwrap();
        let merged = a.merge_disjoint(&b).unwrap();
        assert!(merged.contains_key("grad_clip"));
        assert!(merged.contains_key("loss_scale"));

        let dup = ComponentSpec::try_from(json!({"grad_clip": {"max_norm": 1.0}})).unwrap();
        assert!(a.merge_disjoint(&dup).is_err());
    }

    #[test]
    fn test_try_from_non_mapping_fails() {
        let err = ComponentSpec::try_from(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("list"));
    }
}

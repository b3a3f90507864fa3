use std::collections::BTreeMap;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StageError;

/// Shared state threaded through a pipeline run.
///
/// Keys are strings; values are JSON. The container only grows or overwrites:
/// nothing in the engine removes a key. Stages see it by shared reference and
/// describe their writes as a `StateUpdate`; the engine is the only mutator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateContainer {
    data: BTreeMap<String, Value>,
}

impl StateContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a container holding a single seed value.
    pub fn seeded(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut state = Self::new();
        state.set(key, value.into());
        state
    }

    pub fn from_map(data: HashMap<String, Value>) -> Self {
        Self {
            data: data.into_iter().collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get a value as a string, if it's a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Get a value a stage cannot run without.
    pub fn require(&self, key: &str) -> Result<&Value, StageError> {
        self.data
            .get(key)
            .ok_or_else(|| StageError::MissingInput(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Apply a partial update: every key is inserted, overwriting any prior
    /// value. Applying the same update twice equals applying it once.
    pub fn apply(&mut self, update: StateUpdate) {
        for (k, v) in update.entries {
            self.data.insert(k, v);
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.data.into_iter().collect())
    }
}

/// The keys a stage writes back after it runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    entries: Vec<(String, Value)>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// An update writing a single key.
    pub fn single(key: impl Into<String>, value: Value) -> Self {
        Self::new().with(key, value)
    }

    /// Add a key. A later write to the same key replaces the earlier one.
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        self.entries.retain(|(k, _)| *k != key);
        self.entries.push((key, value));
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

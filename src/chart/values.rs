//! Loosely-typed values tree handed to the chart executor
//!
//! Chart schemas are defined outside this crate, so the tree stays untyped at
//! the boundary. Internal code builds it through the feature value builders
//! and only touches it via dotted paths.

use serde::Serialize;
use serde_json::{Map, Value};

/// Nested string-keyed map of scalars and lists
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Values(Map<String, Value>);

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `path` (dot separated) to `value`, creating intermediate maps.
    /// A scalar sitting where a map is needed is replaced.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(leaf) = segments.pop() else {
            return;
        };

        let mut current = &mut self.0;
        for segment in segments {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            current = match entry {
                Value::Object(map) => map,
                _ => return,
            };
        }
        current.insert(leaf.to_string(), value.into());
    }

    /// Builder form of [`Values::set`]
    pub fn with(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.set(path, value);
        self
    }

    /// Look up a dotted path
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.0.get(first)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Deep-merge `other` into `self`; maps merge recursively, anything else
    /// in `other` wins.
    pub fn merge(&mut self, other: Values) {
        merge_maps(&mut self.0, other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

fn merge_maps(into: &mut Map<String, Value>, from: Map<String, Value>) {
    for (key, value) in from {
        match (into.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming);
            }
            (_, value) => {
                into.insert(key, value);
            }
        }
    }
}

impl From<Map<String, Value>> for Values {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

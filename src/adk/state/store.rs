// SPDX-License-Identifier: MIT

//! Per-run session state with reducer support and an auditable write log

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::schema::{ConflictPolicy, ReducerType, StateSchema};
use crate::adk::error::{AdkError, Result};

/// Mutable key/value context of one run
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    fields: HashMap<String, Value>,
    reducers: HashMap<String, ReducerType>,
    /// Every write since this state (or snapshot) was created, in order
    log: Vec<(String, Value)>,
}

impl SessionState {
    /// Create state from a schema, seeding declared defaults
    pub fn new(schema: &StateSchema) -> Self {
        let mut fields = HashMap::new();
        let mut reducers = HashMap::new();

        for (name, def) in &schema.fields {
            if let Some(default) = &def.default {
                fields.insert(name.clone(), default.clone());
            }
            reducers.insert(name.clone(), def.reducer);
        }

        Self {
            fields,
            reducers,
            log: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Seed state from a JSON object without recording the writes
    pub fn with_initial(mut self, initial: Map<String, Value>) -> Self {
        self.fields.extend(initial);
        self
    }

    fn reducer_for(&self, key: &str) -> ReducerType {
        self.reducers.get(key).copied().unwrap_or_default()
    }

    /// Update a key using its reducer
    pub fn update(&mut self, key: &str, value: Value) {
        self.log.push((key.to_string(), value.clone()));
        self.apply(key, value);
    }

    fn apply(&mut self, key: &str, value: Value) {
        match self.reducer_for(key) {
            ReducerType::Overwrite => {
                self.fields.insert(key.to_string(), value);
            }
            ReducerType::Append => {
                let arr = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Array(vec![]));
                if let Value::Array(a) = arr {
                    match value {
                        Value::Array(new_items) => a.extend(new_items),
                        other => a.push(other),
                    }
                }
            }
            ReducerType::Max => {
                let current = self.fields.get(key).and_then(|v| v.as_f64());
                if let Some(new) = value.as_f64() {
                    if current.map_or(true, |c| new > c) {
                        self.fields.insert(key.to_string(), value);
                    }
                }
            }
            ReducerType::Min => {
                let current = self.fields.get(key).and_then(|v| v.as_f64());
                if let Some(new) = value.as_f64() {
                    if current.map_or(true, |c| new < c) {
                        self.fields.insert(key.to_string(), value);
                    }
                }
            }
            ReducerType::Merge => {
                let current = self
                    .fields
                    .entry(key.to_string())
                    .or_insert(Value::Object(Map::new()));
                if let (Value::Object(current_obj), Value::Object(new_obj)) = (current, value) {
                    current_obj.extend(new_obj);
                }
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Like `get`, but a stored `null` counts as absent
    pub fn get_present(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).filter(|v| !v.is_null())
    }

    /// Get a nested value using dot notation (e.g., "business_data.phone")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = current.get(part)?;
        }
        Some(current)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn to_json(&self) -> Value {
        Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    /// Keys written since creation, in first-write order
    pub fn written_keys(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.log
            .iter()
            .filter(|(k, _)| seen.insert(k.as_str()))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Copy of the current values with an empty write log
    pub fn snapshot(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            reducers: self.reducers.clone(),
            log: Vec::new(),
        }
    }

    /// Replay the writes of concurrently executed children into this state.
    ///
    /// Conflicts are detected before anything is applied, so a rejected merge
    /// leaves this state untouched.
    pub fn merge_children(
        &mut self,
        children: &[(String, SessionState)],
        policy: ConflictPolicy,
    ) -> Result<()> {
        // key -> (writer, final value) for overwrite keys
        let mut overwrites: BTreeMap<String, Vec<(&str, &Value)>> = BTreeMap::new();
        for (name, child) in children {
            for key in child.written_keys() {
                if self.reducer_for(&key).is_order_insensitive() {
                    continue;
                }
                if let Some(value) = child.fields.get(&key) {
                    overwrites
                        .entry(key)
                        .or_default()
                        .push((name.as_str(), value));
                }
            }
        }

        let mut resolved = Vec::with_capacity(overwrites.len());
        for (key, writes) in overwrites {
            let first = writes[0].1;
            let diverged = writes.iter().any(|(_, v)| *v != first);
            if diverged && policy == ConflictPolicy::Reject {
                return Err(AdkError::StateConflict {
                    key,
                    writers: writes.iter().map(|(w, _)| w.to_string()).collect(),
                });
            }
            if diverged {
                log::warn!(
                    "Parallel writers {:?} disagree on '{}', keeping the last",
                    writes.iter().map(|(w, _)| *w).collect::<Vec<_>>(),
                    key
                );
            }
            let last = writes[writes.len() - 1].1.clone();
            resolved.push((key, last));
        }

        for (_, child) in children {
            for (key, value) in &child.log {
                if self.reducer_for(key).is_order_insensitive() {
                    self.update(key, value.clone());
                }
            }
        }
        for (key, value) in resolved {
            self.update(&key, value);
        }
        Ok(())
    }
}

/// Render a JSON value as text for prompts and messages
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

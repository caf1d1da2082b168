// SPDX-License-Identifier: MIT

//! Session state schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared keys of a run's session state
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StateSchema {
    #[serde(flatten)]
    pub fields: HashMap<String, StateFieldDef>,
}

/// Definition of a single state key
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateFieldDef {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub reducer: ReducerType,
    pub default: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
    /// String, object or list, whatever the stage produced
    Any,
}

/// How a write is folded into the current value
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    /// Replace the value (default)
    #[default]
    Overwrite,
    /// Append to array
    Append,
    /// Keep maximum value
    Max,
    /// Keep minimum value
    Min,
    /// Shallow-merge objects
    Merge,
}

impl ReducerType {
    /// Writes under these reducers do not depend on ordering between writers
    pub fn is_order_insensitive(&self) -> bool {
        !matches!(self, ReducerType::Overwrite)
    }
}

/// What a parallel composite does when children write the same key
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Fail the composite with a state conflict
    #[default]
    Reject,
    /// The later child in declaration order wins
    LastWriterWins,
}

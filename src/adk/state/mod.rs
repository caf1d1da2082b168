// SPDX-License-Identifier: MIT

//! Session state management
//!
//! This module provides:
//! - `StateSchema` - declared keys, types, defaults and reducers
//! - `SessionState` - the per-run key/value context threaded through every stage
//! - `ConflictPolicy` - how parallel children's writes are merged back

mod schema;
mod store;

pub use schema::{ConflictPolicy, FieldType, ReducerType, StateFieldDef, StateSchema};
pub use store::{value_to_text, SessionState};

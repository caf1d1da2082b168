// SPDX-License-Identifier: MIT

//! Declarative pipelines
//!
//! - [types] - YAML schema of a pipeline definition
//! - [loader] - parsing and structural checks
//! - [builder] - builds the task tree and the per-pipeline services

pub mod builder;
pub mod loader;
pub mod types;

pub use builder::{Pipeline, PipelineBuilder};
pub use loader::PipelineLoader;
pub use types::{NodeDef, PipelineDefinition};

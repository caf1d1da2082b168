// SPDX-License-Identifier: MIT

//! Workflow orchestration core: state, tasks, composites and the model seam

pub mod agent;
pub mod context;
pub mod error;
pub mod model;
pub mod parse;
pub mod state;
pub mod tool;

// SPDX-License-Identifier: MIT

//! Outreach services and surfaces built on the orchestration core

pub mod broker;
pub mod config;
pub mod dispatcher;
pub mod guard;
pub mod hooks;
pub mod human_tool;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod server;
pub mod tools;

// SPDX-License-Identifier: MIT

//! Model module - the LLM seam used by reasoning leaf tasks
//!
//! Providers live in their own submodules:
//! - [gemini] - Google's Gemini API

pub mod gemini;

use crate::adk::error::Result;
use crate::adk::tool::Tool;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            parts: vec![Part::Text(text.into())],
        }
    }

    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn function_calls(&self) -> Vec<(String, serde_json::Value)> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { name, args, .. } => Some((name.clone(), args.clone())),
                _ => None,
            })
            .collect()
    }
}

/// Parts of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Part {
    Text(String),
    /// Function/tool call requested by the model
    FunctionCall {
        name: String,
        args: serde_json::Value,
        /// Opaque signature some providers require to be echoed back
        #[serde(skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    /// Response from executing a function/tool
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
}

/// A single model request
pub struct ModelRequest<'a> {
    pub system: Option<&'a str>,
    pub history: &'a [Content],
    pub config: Option<&'a GenerationConfig>,
    pub tools: &'a [Arc<dyn Tool>],
}

#[async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    async fn generate_content(&self, request: ModelRequest<'_>) -> Result<Content>;
}

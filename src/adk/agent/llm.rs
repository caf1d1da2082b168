// SPDX-License-Identifier: MIT

//! LLM Task - leaf task backed by a model with tool calling
//!
//! The instruction is rendered against session state, then the model is
//! called in a loop, executing requested tools through the run's executor,
//! until it answers with text.

use super::{Agent, AgentEvent, OutputMapping};
use crate::adk::context::InvocationContext;
use crate::adk::error::{AdkError, Result};
use crate::adk::model::{Content, GenerationConfig, Model, ModelRequest, Part};
use crate::adk::parse::render_template;
use crate::adk::tool::{check_required_args, Tool};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

const DEFAULT_MAX_TURNS: usize = 10;

pub struct LlmTask {
    pub name: String,
    pub description: String,
    pub instruction: String,
    pub model: Arc<dyn Model>,
    pub tools: Vec<Arc<dyn Tool>>,
    pub config: Option<GenerationConfig>,
    pub output: OutputMapping,
    pub max_turns: usize,
    /// HashMap for O(1) tool lookups
    tool_map: HashMap<String, usize>,
}

impl LlmTask {
    pub fn new(
        name: String,
        description: String,
        instruction: String,
        model: Arc<dyn Model>,
        tools: Vec<Arc<dyn Tool>>,
    ) -> Self {
        let tool_map = tools
            .iter()
            .enumerate()
            .map(|(i, t)| (t.name().to_string(), i))
            .collect();

        Self {
            name,
            description,
            instruction,
            model,
            tools,
            config: None,
            output: OutputMapping::default(),
            max_turns: DEFAULT_MAX_TURNS,
            tool_map,
        }
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_output(mut self, output: OutputMapping) -> Self {
        self.output = output;
        self
    }

    fn get_tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tool_map.get(name).map(|&i| &self.tools[i])
    }

    /// One model call, retried once on failure
    async fn generate(&self, system: &str, history: &[Content]) -> Result<Content> {
        let request = || ModelRequest {
            system: Some(system),
            history,
            config: self.config.as_ref(),
            tools: &self.tools,
        };
        match self.model.generate_content(request()).await {
            Ok(content) => Ok(content),
            Err(e) => {
                log::warn!("Agent {} model call failed, retrying once: {}", self.name, e);
                self.model.generate_content(request()).await
            }
        }
    }

    async fn call_tool(
        &self,
        ctx: &mut InvocationContext,
        name: &str,
        args: Value,
    ) -> Result<Value> {
        let Some(tool) = self.get_tool(name) else {
            log::error!("Tool {} not found", name);
            return Ok(json!({ "error": format!("Tool {} not found", name) }));
        };
        if let Err(e) = check_required_args(tool.as_ref(), &args) {
            return Ok(json!({ "error": e.to_string() }));
        }

        let executor = ctx.executor();
        let mut tool_ctx = ctx.tool_context();
        match executor.execute(tool.as_ref(), args, &mut tool_ctx).await {
            Ok(res) => Ok(res),
            Err(AdkError::Cancelled) => Err(AdkError::Cancelled),
            Err(e) => {
                log::error!("Tool {} failed: {}", name, e);
                Ok(json!({ "error": e.to_string() }))
            }
        }
    }
}

#[async_trait]
impl Agent for LlmTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<Value> {
        let system = render_template(&self.instruction, &ctx.state)?;
        let prompt = if ctx.user_input.trim().is_empty() {
            "Proceed.".to_string()
        } else {
            ctx.user_input.clone()
        };
        let mut history = vec![Content::user(prompt)];

        for turn in 0..self.max_turns {
            log::info!("Agent {} turn {}/{}", self.name, turn + 1, self.max_turns);
            let response = self.generate(&system, &history).await?;

            let function_calls = response.function_calls();
            if function_calls.is_empty() {
                let text = response.text();
                if text.is_empty() {
                    log::warn!("Agent {} received empty response", self.name);
                }
                let raw = Value::String(text);
                self.output.apply(&mut ctx.state, &raw);
                return Ok(raw);
            }

            let mut function_responses = Vec::with_capacity(function_calls.len());
            for (name, args) in function_calls {
                log::info!("Tool call: {} {}", name, args);
                ctx.emit(AgentEvent::ToolCall {
                    agent: self.name.clone(),
                    name: name.clone(),
                    args: args.clone(),
                })
                .await;

                let tool_response = self.call_tool(ctx, &name, args).await?;

                ctx.emit(AgentEvent::ToolResult {
                    agent: self.name.clone(),
                    name: name.clone(),
                    result: tool_response.clone(),
                })
                .await;
                function_responses.push(Part::FunctionResponse {
                    name,
                    response: tool_response,
                });
            }

            history.push(response);
            history.push(Content {
                role: "user".to_string(),
                parts: function_responses,
            });
        }

        log::error!("Agent {} reached max turns without text response", self.name);
        Err(AdkError::capability(&self.name, "max turns reached"))
    }
}

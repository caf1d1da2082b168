// SPDX-License-Identifier: MIT

//! The designated tool that suspends a run until an operator responds

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::adk::agent::AgentEvent;
use crate::adk::context::RunStatus;
use crate::adk::error::{AdkError, Result, ValidationError};
use crate::adk::state::value_to_text;
use crate::adk::tool::{Tool, ToolContext};
use crate::outreach::broker::{dedup_key, CreateOutcome, HumanInteractionBroker, HumanOutcome};

pub const TOOL_NAME: &str = "request_human_input";

static SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "prompt": {
                "type": "string",
                "description": "What the operator should produce (e.g. a website brief)"
            }
        },
        "required": ["prompt"]
    })
});

static OUTPUT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "status": {
                "type": "string",
                "enum": ["completed", "timeout", "cancelled", "duplicate"]
            },
            "request_id": {"type": "string"},
            "response": {"type": "string"}
        },
        "required": ["status"]
    })
});

/// Asks an operator for input and waits for the answer.
///
/// A value already present under `result_key` is returned without prompting
/// again. A completed response is written to `result_key`; `clear_key`, when
/// set, is nulled once the interaction ends so the prompt is not re-issued.
/// `outcome_key`, when set, receives `true` only when a response is in hand,
/// so a router can branch away from steps that need it.
pub struct RequestHumanInputTool {
    broker: Arc<HumanInteractionBroker>,
    result_key: String,
    clear_key: Option<String>,
    outcome_key: Option<String>,
}

impl RequestHumanInputTool {
    pub fn new(broker: Arc<HumanInteractionBroker>, result_key: impl Into<String>) -> Self {
        Self {
            broker,
            result_key: result_key.into(),
            clear_key: None,
            outcome_key: None,
        }
    }

    pub fn with_clear_key(mut self, key: impl Into<String>) -> Self {
        self.clear_key = Some(key.into());
        self
    }

    pub fn with_outcome_key(mut self, key: impl Into<String>) -> Self {
        self.outcome_key = Some(key.into());
        self
    }

    fn existing(&self, ctx: &ToolContext<'_>) -> Option<String> {
        ctx.state
            .get_present(&self.result_key)
            .map(value_to_text)
            .filter(|s| !s.trim().is_empty())
    }

    fn record_outcome(&self, ctx: &mut ToolContext<'_>, responded: bool) {
        if let Some(key) = &self.outcome_key {
            ctx.state.update(key, Value::Bool(responded));
        }
    }

    fn finish(&self, ctx: &mut ToolContext<'_>) {
        if let Some(key) = &self.clear_key {
            if ctx.state.contains_key(key) {
                ctx.state.update(key, Value::Null);
            }
        }
    }
}

#[async_trait]
impl Tool for RequestHumanInputTool {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn description(&self) -> &str {
        "Sends a request to a human operator and waits for their response"
    }

    fn schema(&self) -> &Value {
        &SCHEMA
    }

    fn output_schema(&self) -> Option<&Value> {
        Some(&OUTPUT_SCHEMA)
    }

    async fn execute(&self, input: Value, ctx: &mut ToolContext<'_>) -> Result<Value> {
        if let Some(existing) = self.existing(ctx) {
            log::info!("Skipping human request: {} already set", self.result_key);
            self.record_outcome(ctx, true);
            return Ok(json!({"status": "completed", "response": existing}));
        }

        let prompt = input["prompt"]
            .as_str()
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                AdkError::Validation(ValidationError::MissingArgument {
                    tool: TOOL_NAME.to_string(),
                    arg: "prompt".to_string(),
                })
            })?;

        let key = dedup_key(prompt, ctx.run.label());
        let request_id = match self
            .broker
            .create_request(prompt, &key, Some(ctx.run.id()))
            .await
        {
            CreateOutcome::Created(id) => id,
            CreateOutcome::Duplicate(id) => {
                // Give the in-flight request a moment to land its result
                let delay = Duration::from_millis(self.broker.config().recheck_delay_ms);
                tokio::time::sleep(delay).await;
                if let Some(existing) = self.existing(ctx) {
                    self.record_outcome(ctx, true);
                    return Ok(json!({
                        "status": "completed",
                        "request_id": id,
                        "response": existing
                    }));
                }
                self.record_outcome(ctx, false);
                return Ok(json!({"status": "duplicate", "request_id": id}));
            }
        };

        if !self.broker.notify_external(&request_id).await {
            log::warn!(
                "Operators were not notified of request {}; waiting for a response via the API",
                request_id
            );
        }

        log::info!("Run {} paused, waiting for human input ({})", ctx.run.id(), request_id);
        ctx.run.set_status(RunStatus::Suspended);
        ctx.emit(AgentEvent::Suspended {
            request_id: request_id.clone(),
        })
        .await;

        let cancel = ctx.run.cancel_token();
        let timeout = self.broker.config().timeout();
        let outcome = tokio::select! {
            outcome = self.broker.await_response(&request_id, timeout) => outcome,
            _ = cancel.cancelled() => {
                self.broker.cancel_request(&request_id).await;
                HumanOutcome::Cancelled
            }
        };

        ctx.run.set_status(RunStatus::Running);
        let (status, response) = match outcome {
            HumanOutcome::Resolved(value) => ("completed", Some(value)),
            HumanOutcome::TimedOut => ("timeout", None),
            HumanOutcome::Cancelled | HumanOutcome::NotFound => ("cancelled", None),
        };
        log::info!("Run {} resumed, human request {} {}", ctx.run.id(), request_id, status);
        ctx.emit(AgentEvent::Resumed {
            request_id: request_id.clone(),
            status: status.to_string(),
        })
        .await;

        if let Some(value) = &response {
            ctx.state.update(&self.result_key, json!(value));
        }
        self.record_outcome(ctx, response.is_some());
        self.finish(ctx);

        let mut result = json!({"status": status, "request_id": request_id});
        if let Some(value) = response {
            result["response"] = json!(value);
        }
        Ok(result)
    }
}

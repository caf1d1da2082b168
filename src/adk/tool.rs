// SPDX-License-Identifier: MIT

//! Tool trait and the pre-invocation seam every tool call goes through

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::adk::agent::AgentEvent;
use crate::adk::context::RunHandle;
use crate::adk::error::{AdkError, Result, ValidationError};
use crate::adk::state::SessionState;

/// What a tool sees of the run invoking it
pub struct ToolContext<'a> {
    pub run: Arc<RunHandle>,
    pub state: &'a mut SessionState,
    events: Option<mpsc::Sender<AgentEvent>>,
}

impl<'a> ToolContext<'a> {
    pub fn new(run: Arc<RunHandle>, state: &'a mut SessionState) -> Self {
        Self {
            run,
            state,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Option<mpsc::Sender<AgentEvent>>) -> Self {
        self.events = events;
        self
    }

    pub async fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

/// Trait for capabilities that leaf tasks (and models) can call.
///
/// `name()`, `description()` and `schema()` return borrowed data; store them
/// in struct fields or statics.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool name (unique within a registry)
    fn name(&self) -> &str;

    /// Returns a human-readable description of what the tool does
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's input parameters
    fn schema(&self) -> &Value;

    /// JSON schema of the result, when the capability declares one
    fn output_schema(&self) -> Option<&Value> {
        None
    }

    /// Execute the tool with the given input and return the result
    async fn execute(&self, input: Value, ctx: &mut ToolContext<'_>) -> Result<Value>;
}

/// Interposes on every tool invocation of a run
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(
        &self,
        tool: &dyn Tool,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Value>;
}

/// Invokes the tool with no interposition
pub struct DirectExecutor;

#[async_trait]
impl ToolExecutor for DirectExecutor {
    async fn execute(
        &self,
        tool: &dyn Tool,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Value> {
        tool.execute(input, ctx).await
    }
}

/// What a pre-invocation hook decided about a call
#[derive(Debug, Clone, PartialEq)]
pub enum HookDecision {
    Proceed,
    /// Skip the tool and answer with this value instead
    Respond(Value),
}

/// Inspects or rewrites a tool's arguments before it runs
#[async_trait]
pub trait BeforeToolHook: Send + Sync {
    fn name(&self) -> &str;

    async fn before_tool(
        &self,
        tool: &dyn Tool,
        args: &mut Value,
        ctx: &ToolContext<'_>,
    ) -> Result<HookDecision>;
}

/// Runs hooks in order, then hands the call to `inner`.
///
/// The first hook that responds ends the chain and the tool is not invoked.
pub struct HookedExecutor {
    hooks: Vec<Arc<dyn BeforeToolHook>>,
    inner: Arc<dyn ToolExecutor>,
}

impl HookedExecutor {
    pub fn new(hooks: Vec<Arc<dyn BeforeToolHook>>, inner: Arc<dyn ToolExecutor>) -> Self {
        Self { hooks, inner }
    }
}

#[async_trait]
impl ToolExecutor for HookedExecutor {
    async fn execute(
        &self,
        tool: &dyn Tool,
        mut input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Value> {
        for hook in &self.hooks {
            if let HookDecision::Respond(value) = hook.before_tool(tool, &mut input, ctx).await? {
                log::info!("Hook {} answered for tool {}", hook.name(), tool.name());
                return Ok(value);
            }
        }
        self.inner.execute(tool, input, ctx).await
    }
}

/// Check the `required` list of a tool's input schema against the arguments
pub fn check_required_args(tool: &dyn Tool, input: &Value) -> Result<()> {
    let Some(required) = tool.schema().get("required").and_then(Value::as_array) else {
        return Ok(());
    };
    for arg in required.iter().filter_map(Value::as_str) {
        let present = input.get(arg).is_some_and(|v| !v.is_null());
        if !present {
            return Err(AdkError::Validation(ValidationError::MissingArgument {
                tool: tool.name().to_string(),
                arg: arg.to_string(),
            }));
        }
    }
    Ok(())
}

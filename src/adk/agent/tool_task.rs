// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{Agent, AgentEvent, OutputMapping};
use crate::adk::context::InvocationContext;
use crate::adk::error::Result;
use crate::adk::parse::render_value;
use crate::adk::tool::{check_required_args, Tool};

/// Leaf task that invokes one tool with arguments templated from state
pub struct ToolTask {
    pub name: String,
    pub tool: Arc<dyn Tool>,
    /// String leaves may hold `{key}` placeholders
    pub args: Value,
    pub output: OutputMapping,
}

impl ToolTask {
    pub fn new(name: String, tool: Arc<dyn Tool>, args: Value) -> Self {
        Self {
            name,
            tool,
            args,
            output: OutputMapping::default(),
        }
    }

    pub fn with_output(mut self, output: OutputMapping) -> Self {
        self.output = output;
        self
    }
}

#[async_trait]
impl Agent for ToolTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<Value> {
        let args = render_value(&self.args, &ctx.state)?;
        check_required_args(self.tool.as_ref(), &args)?;

        ctx.emit(AgentEvent::ToolCall {
            agent: self.name.clone(),
            name: self.tool.name().to_string(),
            args: args.clone(),
        })
        .await;

        let executor = ctx.executor();
        let result = {
            let mut tool_ctx = ctx.tool_context();
            executor
                .execute(self.tool.as_ref(), args, &mut tool_ctx)
                .await?
        };

        ctx.emit(AgentEvent::ToolResult {
            agent: self.name.clone(),
            name: self.tool.name().to_string(),
            result: result.clone(),
        })
        .await;

        self.output.apply(&mut ctx.state, &result);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::context;
    use super::*;
    use crate::adk::error::AdkError;
    use crate::adk::tool::ToolContext;
    use once_cell::sync::Lazy;
    use serde_json::json;

    static SCHEMA: Lazy<Value> = Lazy::new(|| {
        json!({"type": "object", "required": ["destination"]})
    });

    struct DialTool;

    #[async_trait]
    impl Tool for DialTool {
        fn name(&self) -> &str {
            "phone_call_tool"
        }
        fn description(&self) -> &str {
            "Places a call"
        }
        fn schema(&self) -> &Value {
            &SCHEMA
        }
        async fn execute(&self, input: Value, _ctx: &mut ToolContext<'_>) -> Result<Value> {
            Ok(json!({"status": "completed", "to": input["destination"]}))
        }
    }

    #[tokio::test]
    async fn test_args_are_rendered_from_state() {
        let task = ToolTask::new(
            "outreach_caller".into(),
            Arc::new(DialTool),
            json!({"destination": "{business_data.phone}"}),
        )
        .with_output(OutputMapping::to_key("call_result"));

        let mut ctx = context();
        ctx.state.update("business_data", json!({"phone": "+15550100"}));
        let out = task.run(&mut ctx).await.unwrap();

        assert_eq!(out["to"], "+15550100");
        assert_eq!(ctx.state.get("call_result"), Some(&out));
    }

    #[tokio::test]
    async fn test_missing_argument_fails_validation() {
        let task = ToolTask::new("caller".into(), Arc::new(DialTool), json!({}));
        let err = task.run(&mut context()).await.unwrap_err();
        assert!(matches!(err, AdkError::Validation(_)));
    }
}

// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{run_agent, AfterAgentHook, Agent};
use crate::adk::context::InvocationContext;
use crate::adk::error::Result;

/// Runs children in order; each child sees every earlier child's writes
pub struct SequentialAgent {
    pub name: String,
    pub description: String,
    pub sub_agents: Vec<Arc<dyn Agent>>,
    after: Option<Arc<dyn AfterAgentHook>>,
}

impl SequentialAgent {
    pub fn new(name: String, description: String, sub_agents: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name,
            description,
            sub_agents,
            after: None,
        }
    }

    /// Attach a hook fired once per run after the last child
    pub fn with_after_hook(mut self, hook: Arc<dyn AfterAgentHook>) -> Self {
        self.after = Some(hook);
        self
    }
}

#[async_trait]
impl Agent for SequentialAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<Value> {
        let mut outcome = Ok(Value::Null);
        for agent in &self.sub_agents {
            outcome = run_agent(agent.as_ref(), ctx).await;
            if outcome.is_err() {
                break;
            }
        }

        if let Some(hook) = &self.after {
            if ctx.run.mark_once(hook.name()).await {
                hook.on_complete(&ctx.run, &ctx.state, outcome.as_ref()).await;
            } else {
                log::debug!("Hook {} already fired for run {}", hook.name(), ctx.run.id());
            }
        }
        outcome
    }
}

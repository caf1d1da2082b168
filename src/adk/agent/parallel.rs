// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::task::AbortOnDropHandle;

use super::{run_agent, Agent};
use crate::adk::context::InvocationContext;
use crate::adk::error::{AdkError, Result};
use crate::adk::state::SessionState;

/// Runs children concurrently, each over its own snapshot of the state.
///
/// All children run to completion. Writes of the children that succeeded are
/// merged back under the context's conflict policy; the first child error
/// (in declaration order) is then returned.
pub struct ParallelAgent {
    pub name: String,
    pub description: String,
    pub sub_agents: Vec<Arc<dyn Agent>>,
}

impl ParallelAgent {
    pub fn new(name: String, description: String, sub_agents: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name,
            description,
            sub_agents,
        }
    }
}

#[async_trait]
impl Agent for ParallelAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<Value> {
        let mut handles = Vec::with_capacity(self.sub_agents.len());
        for agent in &self.sub_agents {
            let agent = agent.clone();
            let mut child = ctx.fork();
            // Aborted if this composite is dropped (e.g. run cancelled)
            handles.push(AbortOnDropHandle::new(tokio::spawn(async move {
                let result = run_agent(agent.as_ref(), &mut child).await;
                (agent.name().to_string(), result, child.state)
            })));
        }

        let mut outputs = Vec::with_capacity(handles.len());
        let mut merged: Vec<(String, SessionState)> = Vec::new();
        let mut first_error: Option<AdkError> = None;

        for handle in handles {
            match handle.await {
                Ok((name, Ok(output), state)) => {
                    outputs.push(output);
                    merged.push((name, state));
                }
                Ok((name, Err(e), _)) => {
                    log::warn!("Parallel child {} of {} failed: {}", name, self.name, e);
                    outputs.push(Value::Null);
                    first_error.get_or_insert(e);
                }
                Err(join_err) => {
                    outputs.push(Value::Null);
                    first_error.get_or_insert(AdkError::Join(join_err));
                }
            }
        }

        let policy = ctx.conflict_policy();
        ctx.state.merge_children(&merged, policy)?;

        match first_error {
            Some(e) => Err(e),
            None => Ok(Value::Array(outputs)),
        }
    }
}

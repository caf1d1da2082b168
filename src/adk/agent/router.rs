// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{run_agent, Agent, AgentEvent};
use crate::adk::context::InvocationContext;
use crate::adk::error::{AdkError, Result, ValidationError};
use crate::adk::state::SessionState;

/// Runs exactly one of two branches, chosen by a boolean classification key.
///
/// A missing key is a validation error, never a default branch.
pub struct ConditionalRouter {
    pub name: String,
    pub key: String,
    pub on_true: Arc<dyn Agent>,
    pub on_false: Arc<dyn Agent>,
}

impl ConditionalRouter {
    pub fn new(
        name: String,
        key: String,
        on_true: Arc<dyn Agent>,
        on_false: Arc<dyn Agent>,
    ) -> Self {
        Self {
            name,
            key,
            on_true,
            on_false,
        }
    }

    /// Read the classification; `"true"`/`"false"` strings are accepted
    pub fn classify(&self, state: &SessionState) -> Result<bool> {
        match state.get_path(&self.key) {
            None | Some(Value::Null) => Err(AdkError::missing_key(&self.key)),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("true") => Ok(true),
            Some(Value::String(s)) if s.trim().eq_ignore_ascii_case("false") => Ok(false),
            Some(other) => Err(AdkError::Validation(ValidationError::NotBoolean {
                key: self.key.clone(),
                found: other.to_string(),
            })),
        }
    }
}

#[async_trait]
impl Agent for ConditionalRouter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<Value> {
        let category = self.classify(&ctx.state)?;
        let branch = if category { &self.on_true } else { &self.on_false };

        log::info!(
            "Router {}: {} = {}, running {}",
            self.name,
            self.key,
            category,
            branch.name()
        );
        ctx.emit(AgentEvent::RouteTaken {
            agent: self.name.clone(),
            key: self.key.clone(),
            branch: branch.name().to_string(),
        })
        .await;

        run_agent(branch.as_ref(), ctx).await
    }
}

// SPDX-License-Identifier: MIT

//! Agent module - workflow nodes
//!
//! This module provides the core Agent trait and implementations:
//! - `LlmTask` - leaf task backed by a model, with tool calling
//! - `ToolTask` - leaf task invoking one named tool directly
//! - `SequentialAgent` - runs children in order, with an optional after hook
//! - `ParallelAgent` - runs children concurrently over state snapshots
//! - `LoopAgent` - refines until a gate passes or iterations run out
//! - `ConditionalRouter` - dispatches to one of two branches on a boolean key

mod llm;
mod loop_agent;
mod parallel;
mod router;
mod sequential;
mod tool_task;

pub use llm::LlmTask;
pub use loop_agent::{ExhaustionPolicy, Gate, LoopAgent, StatusGate};
pub use parallel::ParallelAgent;
pub use router::ConditionalRouter;
pub use sequential::SequentialAgent;
pub use tool_task::ToolTask;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adk::context::{InvocationContext, RunHandle, RunStatus};
use crate::adk::error::{AdkError, Result};
use crate::adk::parse::{extract_json_path, parse_structured};
use crate::adk::state::SessionState;

/// Progress of a run, streamed to observers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Started {
        agent: String,
    },
    Completed {
        agent: String,
    },
    ToolCall {
        agent: String,
        name: String,
        args: Value,
    },
    ToolResult {
        agent: String,
        name: String,
        result: Value,
    },
    Suspended {
        request_id: String,
    },
    Resumed {
        request_id: String,
        status: String,
    },
    GateEvaluated {
        agent: String,
        iteration: u32,
        passed: bool,
    },
    LoopExhausted {
        agent: String,
        iterations: u32,
    },
    RouteTaken {
        agent: String,
        key: String,
        branch: String,
    },
    Error {
        agent: String,
        message: String,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
    },
}

/// A node of a workflow
#[async_trait]
pub trait Agent: Send + Sync {
    /// Returns the agent name
    fn name(&self) -> &str;

    /// Run the node against the run's context and return its result
    async fn run(&self, ctx: &mut InvocationContext) -> Result<Value>;
}

/// Hook fired once after a sequential composite's last child finishes,
/// whether the sequence succeeded or not
#[async_trait]
pub trait AfterAgentHook: Send + Sync {
    /// Identity used to fire the hook at most once per run
    fn name(&self) -> &str;

    async fn on_complete(
        &self,
        run: &RunHandle,
        state: &SessionState,
        outcome: std::result::Result<&Value, &AdkError>,
    );
}

/// Run a child node, checking for cancellation and reporting progress
pub async fn run_agent(agent: &dyn Agent, ctx: &mut InvocationContext) -> Result<Value> {
    if ctx.run.is_cancelled() {
        return Err(AdkError::Cancelled);
    }
    ctx.emit(AgentEvent::Started {
        agent: agent.name().to_string(),
    })
    .await;

    let result = agent.run(ctx).await;

    match &result {
        Ok(_) => {
            ctx.emit(AgentEvent::Completed {
                agent: agent.name().to_string(),
            })
            .await
        }
        Err(e) => {
            log::error!("Agent {} failed: {}", agent.name(), e);
            ctx.emit(AgentEvent::Error {
                agent: agent.name().to_string(),
                message: e.to_string(),
            })
            .await
        }
    }
    result
}

/// Where a leaf task writes its result
#[derive(Debug, Clone, Default)]
pub struct OutputMapping {
    /// Receives the raw result
    pub output_key: Option<String>,
    /// State key -> dotted path inside the parsed result
    pub outputs: Vec<(String, String)>,
}

impl OutputMapping {
    pub fn to_key(key: impl Into<String>) -> Self {
        Self {
            output_key: Some(key.into()),
            outputs: Vec::new(),
        }
    }

    pub fn with_output(mut self, key: impl Into<String>, path: impl Into<String>) -> Self {
        self.outputs.push((key.into(), path.into()));
        self
    }

    pub fn apply(&self, state: &mut SessionState, raw: &Value) {
        if let Some(key) = &self.output_key {
            state.update(key, raw.clone());
        }
        if self.outputs.is_empty() {
            return;
        }
        let parsed = parse_structured(raw);
        for (key, path) in &self.outputs {
            match extract_json_path(&parsed, path) {
                Some(value) => state.update(key, value),
                None => log::debug!("Output path '{}' not found for key '{}'", path, key),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Writes a fixed value to a key and counts its invocations
    pub struct MockAgent {
        name: String,
        key: String,
        value: Value,
        pub calls: AtomicUsize,
    }

    impl MockAgent {
        pub fn new(name: &str, key: &str, value: Value) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                key: key.to_string(),
                value,
                calls: AtomicUsize::new(0),
            })
        }

        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Agent for MockAgent {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, ctx: &mut InvocationContext) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ctx.state.update(&self.key, self.value.clone());
            Ok(self.value.clone())
        }
    }

    /// Always fails with a capability error
    pub struct FailingAgent(pub &'static str);

    #[async_trait]
    impl Agent for FailingAgent {
        fn name(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: &mut InvocationContext) -> Result<Value> {
            Err(AdkError::capability(self.0, "boom"))
        }
    }

    pub fn context() -> InvocationContext {
        let run = Arc::new(RunHandle::new("run-test", "session"));
        InvocationContext::new(run, SessionState::empty(), "start")
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_agent_refuses_cancelled_run() {
        let agent = MockAgent::new("a", "k", json!(1));
        let mut ctx = context();
        ctx.run.cancel_token().cancel();

        let err = run_agent(agent.as_ref(), &mut ctx).await.unwrap_err();
        assert!(matches!(err, AdkError::Cancelled));
        assert_eq!(agent.count(), 0);
    }

    #[tokio::test]
    async fn test_run_agent_emits_events() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let mut ctx = context().with_events(tx);
        let agent = MockAgent::new("writer", "k", json!(1));

        run_agent(agent.as_ref(), &mut ctx).await.unwrap();
        drop(ctx);

        let mut events = Vec::new();
        while let Some(e) = rx.recv().await {
            events.push(e);
        }
        assert_eq!(
            events,
            vec![
                AgentEvent::Started {
                    agent: "writer".into()
                },
                AgentEvent::Completed {
                    agent: "writer".into()
                },
            ]
        );
    }

    #[test]
    fn test_output_mapping_extracts_from_fenced_json() {
        let mut state = SessionState::empty();
        let mapping = OutputMapping::to_key("quality_check_status")
            .with_output("quality_status", "status")
            .with_output("quality_reasons", "reasons");

        mapping.apply(
            &mut state,
            &json!("```json\n{\"status\": \"pass\", \"reasons\": []}\n```"),
        );

        assert!(state.get("quality_check_status").unwrap().is_string());
        assert_eq!(state.get("quality_status"), Some(&json!("pass")));
        assert_eq!(state.get("quality_reasons"), Some(&json!([])));
    }

    #[test]
    fn test_output_mapping_tolerates_prose() {
        let mut state = SessionState::empty();
        OutputMapping::default()
            .with_output("quality_status", "status")
            .apply(&mut state, &json!("looks fine to me"));
        assert!(state.get("quality_status").is_none());
    }
}

// SPDX-License-Identifier: MIT

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{run_agent, Agent, AgentEvent};
use crate::adk::context::InvocationContext;
use crate::adk::error::{AdkError, Result};
use crate::adk::state::SessionState;

/// Decides whether a refinement loop may stop
pub trait Gate: Send + Sync {
    fn evaluate(&self, state: &SessionState) -> bool;
}

/// Passes when a status key holds the pass value.
///
/// Comparison is trimmed and case-insensitive; `true` also passes. An absent
/// key never passes.
#[derive(Debug, Clone)]
pub struct StatusGate {
    pub key: String,
    pub pass_value: String,
}

impl StatusGate {
    pub fn new(key: impl Into<String>, pass_value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            pass_value: pass_value.into(),
        }
    }
}

impl Default for StatusGate {
    fn default() -> Self {
        Self::new("quality_status", "pass")
    }
}

impl Gate for StatusGate {
    fn evaluate(&self, state: &SessionState) -> bool {
        match state.get_path(&self.key) {
            Some(Value::String(s)) => s.trim().eq_ignore_ascii_case(&self.pass_value),
            Some(Value::Bool(b)) => *b,
            _ => false,
        }
    }
}

/// What happens when the iterations run out without a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Continue with the last iteration's artifact
    #[default]
    SoftFail,
    Fail,
}

/// Repeats its children until the gate passes, at most `max_iterations` times
pub struct LoopAgent {
    pub name: String,
    pub description: String,
    pub sub_agents: Vec<Arc<dyn Agent>>,
    pub gate: Arc<dyn Gate>,
    pub max_iterations: u32,
    pub on_exhausted: ExhaustionPolicy,
}

impl LoopAgent {
    pub fn new(
        name: String,
        description: String,
        sub_agents: Vec<Arc<dyn Agent>>,
        gate: Arc<dyn Gate>,
        max_iterations: u32,
    ) -> Self {
        Self {
            name,
            description,
            sub_agents,
            gate,
            max_iterations,
            on_exhausted: ExhaustionPolicy::default(),
        }
    }

    pub fn with_exhaustion_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.on_exhausted = policy;
        self
    }
}

#[async_trait]
impl Agent for LoopAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &mut InvocationContext) -> Result<Value> {
        let mut last = Value::Null;
        for iteration in 1..=self.max_iterations {
            log::info!(
                "Loop {} iteration {}/{}",
                self.name,
                iteration,
                self.max_iterations
            );
            for agent in &self.sub_agents {
                last = run_agent(agent.as_ref(), ctx).await?;
            }

            let passed = self.gate.evaluate(&ctx.state);
            ctx.emit(AgentEvent::GateEvaluated {
                agent: self.name.clone(),
                iteration,
                passed,
            })
            .await;
            if passed {
                log::info!("Loop {} passed after {} iteration(s)", self.name, iteration);
                return Ok(last);
            }
        }

        ctx.emit(AgentEvent::LoopExhausted {
            agent: self.name.clone(),
            iterations: self.max_iterations,
        })
        .await;

        match self.on_exhausted {
            ExhaustionPolicy::SoftFail => {
                log::warn!(
                    "Loop {} exhausted {} iterations without passing, continuing with last result",
                    self.name,
                    self.max_iterations
                );
                Ok(last)
            }
            ExhaustionPolicy::Fail => Err(AdkError::LoopExhausted {
                name: self.name.clone(),
                iterations: self.max_iterations,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes "pass" to quality_status from its `pass_on`th call onwards
    struct Checker {
        pass_on: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Agent for Checker {
        fn name(&self) -> &str {
            "quality_checker"
        }

        async fn run(&self, ctx: &mut InvocationContext) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let status = if n >= self.pass_on { "pass" } else { "fail" };
            ctx.state.update("quality_status", json!(status));
            Ok(json!(status))
        }
    }

    struct CountingGate {
        inner: StatusGate,
        calls: AtomicUsize,
    }

    impl Gate for CountingGate {
        fn evaluate(&self, state: &SessionState) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.evaluate(state)
        }
    }

    fn refinement_loop(pass_on: usize) -> (LoopAgent, Arc<MockAgent>, Arc<CountingGate>) {
        let refiner = MockAgent::new("refiner", "draft", json!("spec"));
        let gate = Arc::new(CountingGate {
            inner: StatusGate::default(),
            calls: AtomicUsize::new(0),
        });
        let checker = Arc::new(Checker {
            pass_on,
            calls: AtomicUsize::new(0),
        });
        let loop_agent = LoopAgent::new(
            "spec_creator".into(),
            "test".into(),
            vec![refiner.clone(), checker],
            gate.clone(),
            3,
        );
        (loop_agent, refiner, gate)
    }

    #[test]
    fn test_status_gate() {
        let gate = StatusGate::default();
        let mut state = SessionState::empty();
        assert!(!gate.evaluate(&state));

        state.update("quality_status", json!(" PASS \n"));
        assert!(gate.evaluate(&state));
        state.update("quality_status", json!("fail"));
        assert!(!gate.evaluate(&state));
        state.update("quality_status", json!(true));
        assert!(gate.evaluate(&state));
        state.update("quality_status", json!({"status": "pass"}));
        assert!(!gate.evaluate(&state));
    }

    #[tokio::test]
    async fn test_loop_halts_at_first_pass() {
        let (loop_agent, refiner, gate) = refinement_loop(2);
        let mut ctx = context();

        let out = loop_agent.run(&mut ctx).await.unwrap();

        assert_eq!(out, json!("pass"));
        assert_eq!(refiner.count(), 2);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.state.get("quality_status"), Some(&json!("pass")));
    }

    #[tokio::test]
    async fn test_exhaustion_soft_fails_with_last_draft() {
        let (loop_agent, refiner, gate) = refinement_loop(usize::MAX);
        let mut ctx = context();

        loop_agent.run(&mut ctx).await.unwrap();

        assert_eq!(refiner.count(), 3);
        assert_eq!(gate.calls.load(Ordering::SeqCst), 3);
        assert_eq!(ctx.state.get("draft"), Some(&json!("spec")));
        assert_eq!(ctx.state.get("quality_status"), Some(&json!("fail")));
    }

    #[tokio::test]
    async fn test_exhaustion_can_fail_hard() {
        let (loop_agent, _, _) = refinement_loop(usize::MAX);
        let loop_agent = loop_agent.with_exhaustion_policy(ExhaustionPolicy::Fail);

        let err = loop_agent.run(&mut context()).await.unwrap_err();
        assert!(matches!(err, AdkError::LoopExhausted { iterations: 3, .. }));
    }

    #[tokio::test]
    async fn test_zero_iterations_runs_nothing() {
        let refiner = MockAgent::new("refiner", "draft", json!("spec"));
        let loop_agent = LoopAgent::new(
            "noop".into(),
            "test".into(),
            vec![refiner.clone()],
            Arc::new(StatusGate::default()),
            0,
        );

        assert_eq!(loop_agent.run(&mut context()).await.unwrap(), Value::Null);
        assert_eq!(refiner.count(), 0);
    }
}

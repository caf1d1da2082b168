// SPDX-License-Identifier: MIT

//! Workflow run lifecycle
//!
//! Owns the registry of runs: assigns ids, drives a pipeline's root task
//! against fresh session state, and tears a run down on completion or
//! cancellation (pending human requests, guard bookkeeping, abort hook).
//! Finished runs stay queryable for a retention period, then are forgotten;
//! the audit artifact is the durable export of their state.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::adk::agent::{run_agent, AfterAgentHook, AgentEvent};
use crate::adk::context::{InvocationContext, RunHandle, RunStatus};
use crate::adk::error::{AdkError, Result};
use crate::adk::state::{ConflictPolicy, SessionState};
use crate::outreach::broker::HumanInteractionBroker;
use crate::outreach::pipeline::Pipeline;

/// Outcome of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub label: String,
    pub status: RunStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub state: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// What `GET /api/runs/{id}` shows
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub label: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<RunReport>,
}

struct RunEntry {
    handle: Arc<RunHandle>,
    report: Option<RunReport>,
}

#[derive(Clone)]
pub struct Runner {
    pipeline: Arc<Pipeline>,
    broker: Arc<HumanInteractionBroker>,
    conflict_policy: ConflictPolicy,
    retention: Duration,
    runs: Arc<RwLock<HashMap<String, RunEntry>>>,
}

impl Runner {
    pub fn new(pipeline: Arc<Pipeline>, broker: Arc<HumanInteractionBroker>) -> Self {
        Self {
            pipeline,
            broker,
            conflict_policy: ConflictPolicy::default(),
            retention: Duration::from_secs(600),
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// How long a finished run stays queryable
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn broker(&self) -> &Arc<HumanInteractionBroker> {
        &self.broker
    }

    /// Run to completion
    pub async fn run(&self, input: Value, label: Option<String>) -> Result<RunReport> {
        let (handle, input) = self.register(input, label).await?;
        Ok(self.execute(handle, input, None).await)
    }

    /// Spawn a run and return its handle; progress goes to `events`
    pub async fn start(
        &self,
        input: Value,
        label: Option<String>,
        events: Option<mpsc::Sender<AgentEvent>>,
    ) -> Result<Arc<RunHandle>> {
        let (handle, input) = self.register(input, label).await?;
        let runner = self.clone();
        let run = handle.clone();
        tokio::spawn(async move {
            runner.execute(run, input, events).await;
        });
        Ok(handle)
    }

    /// Cancel a live run. Returns false for unknown or finished runs.
    pub async fn cancel(&self, run_id: &str) -> bool {
        let handle = {
            let runs = self.runs.read().await;
            match runs.get(run_id) {
                Some(entry) if !entry.handle.status().is_terminal() => entry.handle.clone(),
                _ => return false,
            }
        };
        log::info!("Cancelling run {}", run_id);
        handle.cancel_token().cancel();
        self.broker.cancel_run(run_id).await;
        true
    }

    pub async fn get(&self, run_id: &str) -> Option<RunSummary> {
        let runs = self.runs.read().await;
        runs.get(run_id).map(|entry| RunSummary {
            run_id: entry.handle.id().to_string(),
            label: entry.handle.label().to_string(),
            status: entry.handle.status(),
            started_at: entry.handle.started_at(),
            report: entry.report.clone(),
        })
    }

    async fn register(
        &self,
        input: Value,
        label: Option<String>,
    ) -> Result<(Arc<RunHandle>, Map<String, Value>)> {
        let Value::Object(input) = input else {
            return Err(AdkError::Other("run input must be a JSON object".into()));
        };

        let run_id = Uuid::new_v4().to_string();
        let label = label
            .or_else(|| self.label_from(&input))
            .unwrap_or_else(|| run_id.clone());
        let handle = Arc::new(RunHandle::new(run_id.clone(), label));

        self.runs.write().await.insert(
            run_id.clone(),
            RunEntry {
                handle: handle.clone(),
                report: None,
            },
        );
        log::info!("Registered run {} ({})", run_id, handle.label());
        Ok((handle, input))
    }

    fn label_from(&self, input: &Map<String, Value>) -> Option<String> {
        let path = self.pipeline.definition.label_key.as_deref()?;
        let state = SessionState::empty().with_initial(input.clone());
        state.get_path(path).and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    async fn execute(
        &self,
        handle: Arc<RunHandle>,
        input: Map<String, Value>,
        events: Option<mpsc::Sender<AgentEvent>>,
    ) -> RunReport {
        let user_input = Value::Object(input.clone()).to_string();
        let state = SessionState::new(&self.pipeline.definition.state).with_initial(input);
        let mut ctx = InvocationContext::new(handle.clone(), state, user_input)
            .with_executor(self.pipeline.executor.clone())
            .with_conflict_policy(self.conflict_policy);
        if let Some(tx) = events {
            ctx = ctx.with_events(tx);
        }

        log::info!("Run {} started", handle.id());
        let cancel = handle.cancel_token();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AdkError::Cancelled),
            result = run_agent(self.pipeline.root.as_ref(), &mut ctx) => result,
        };

        if let Err(e) = &result {
            self.abort_hook(&handle, &ctx.state, e).await;
        }
        self.broker.cancel_run(handle.id()).await;
        self.pipeline.guard.release_run(handle.id()).await;

        let status = match &result {
            Ok(_) => RunStatus::Completed,
            Err(_) => RunStatus::Failed,
        };
        handle.set_status(status);
        match &result {
            Ok(_) => log::info!("Run {} completed", handle.id()),
            Err(e) => log::error!("Run {} failed: {}", handle.id(), e),
        }
        ctx.emit(AgentEvent::RunFinished {
            run_id: handle.id().to_string(),
            status,
        })
        .await;

        let (output, error) = match result {
            Ok(v) => (Some(v), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let report = RunReport {
            run_id: handle.id().to_string(),
            label: handle.label().to_string(),
            status,
            output,
            error,
            state: ctx.state.to_json(),
            started_at: handle.started_at(),
            finished_at: Utc::now(),
        };
        if let Some(entry) = self.runs.write().await.get_mut(handle.id()) {
            entry.report = Some(report.clone());
        }
        self.schedule_release(handle.id().to_string());
        report
    }

    fn schedule_release(&self, run_id: String) {
        let runs = self.runs.clone();
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep(retention).await;
            let mut runs = runs.write().await;
            if runs
                .get(&run_id)
                .is_some_and(|e| e.handle.status().is_terminal())
            {
                runs.remove(&run_id);
                log::debug!("Released finished run {}", run_id);
            }
        });
    }

    /// Failure notification for runs that never reached the root's own hook,
    /// e.g. cancelled while suspended
    async fn abort_hook(&self, handle: &RunHandle, state: &SessionState, error: &AdkError) {
        let Some(dispatcher) = &self.pipeline.dispatcher else {
            return;
        };
        if handle.mark_once(dispatcher.name()).await {
            dispatcher.on_complete(handle, state, Err(error)).await;
        }
    }
}

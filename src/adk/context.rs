// SPDX-License-Identifier: MIT

//! Run identity and the invocation context threaded through every agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;

use crate::adk::agent::AgentEvent;
use crate::adk::state::{ConflictPolicy, SessionState};
use crate::adk::tool::{DirectExecutor, ToolContext, ToolExecutor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    /// Waiting on an out-of-band human response
    Suspended,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

/// Identity and lifecycle of one workflow run
#[derive(Debug)]
pub struct RunHandle {
    id: String,
    label: String,
    status: watch::Sender<RunStatus>,
    cancel: CancellationToken,
    fired_hooks: Mutex<HashSet<String>>,
    started_at: DateTime<Utc>,
}

impl RunHandle {
    /// `label` is the logical session the run belongs to (e.g. the lead id)
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        let (status, _) = watch::channel(RunStatus::Running);
        Self {
            id: id.into(),
            label: label.into(),
            status,
            cancel: CancellationToken::new(),
            fired_hooks: Mutex::new(HashSet::new()),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Terminal statuses are sticky
    pub fn set_status(&self, next: RunStatus) {
        self.status.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            log::debug!("Run {} status {:?} -> {:?}", self.id, current, next);
            *current = next;
            true
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.subscribe()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns true the first time it is called for `hook` within this run
    pub async fn mark_once(&self, hook: &str) -> bool {
        self.fired_hooks.lock().await.insert(hook.to_string())
    }
}

/// Everything an agent needs while it runs
pub struct InvocationContext {
    pub run: Arc<RunHandle>,
    pub state: SessionState,
    /// The message that started the run
    pub user_input: String,
    executor: Arc<dyn ToolExecutor>,
    events: Option<mpsc::Sender<AgentEvent>>,
    conflict_policy: ConflictPolicy,
}

impl InvocationContext {
    pub fn new(run: Arc<RunHandle>, state: SessionState, user_input: impl Into<String>) -> Self {
        Self {
            run,
            state,
            user_input: user_input.into(),
            executor: Arc::new(DirectExecutor),
            events: None,
            conflict_policy: ConflictPolicy::default(),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_events(mut self, tx: mpsc::Sender<AgentEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.conflict_policy
    }

    pub fn executor(&self) -> Arc<dyn ToolExecutor> {
        self.executor.clone()
    }

    /// Child context over a snapshot of the state, for concurrent execution
    pub fn fork(&self) -> Self {
        Self {
            run: self.run.clone(),
            state: self.state.snapshot(),
            user_input: self.user_input.clone(),
            executor: self.executor.clone(),
            events: self.events.clone(),
            conflict_policy: self.conflict_policy,
        }
    }

    pub fn tool_context(&mut self) -> ToolContext<'_> {
        ToolContext::new(self.run.clone(), &mut self.state).with_events(self.events.clone())
    }

    /// Publish a progress event; a closed receiver is not an error
    pub async fn emit(&self, event: AgentEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event).await;
        }
    }
}

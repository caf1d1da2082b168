// SPDX-License-Identifier: MIT

//! Idempotency Guard
//!
//! Wraps every tool invocation of a run. Effectful tools on the allow-list
//! execute at most once per run: a terminal-success record in session state
//! short-circuits the call, and concurrent identical calls share a single
//! in-flight execution. Other tools get one retry on failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

use crate::adk::error::{AdkError, Result};
use crate::adk::tool::{Tool, ToolContext, ToolExecutor};

/// An effectful tool and the state key its invocation record lives under
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardedTool {
    pub name: String,
    pub state_key: String,
}

/// Outcome of a guarded invocation, stored in session state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub tool: String,
    pub result: Value,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ToolInvocationRecord {
    pub fn new(tool: &str, result: Value) -> Self {
        Self {
            tool: tool.to_string(),
            success: is_terminal_success(&result),
            result,
            recorded_at: Utc::now(),
        }
    }
}

/// A result counts as terminal success unless it reports an error or a
/// failed status
fn is_terminal_success(result: &Value) -> bool {
    if result.get("error").is_some_and(|e| !e.is_null()) {
        return false;
    }
    match result.get("status").and_then(Value::as_str) {
        Some(s) => !matches!(
            s.to_ascii_lowercase().as_str(),
            "failed" | "error" | "busy" | "no-answer" | "no_answer" | "canceled" | "cancelled"
        ),
        None => true,
    }
}

/// Cached result held in a state entry, if it is a terminal success.
///
/// Besides our own records, a raw result that reports a finished status or
/// carries a transcript is honoured, so seeded state also suppresses calls.
fn cached_result(entry: &Value) -> Option<Value> {
    if let Ok(record) = serde_json::from_value::<ToolInvocationRecord>(entry.clone()) {
        return record.success.then_some(record.result);
    }
    let finished = entry
        .get("status")
        .and_then(Value::as_str)
        .is_some_and(|s| matches!(s.to_ascii_lowercase().as_str(), "done" | "completed"));
    let has_transcript = entry.get("transcript").is_some_and(|t| !t.is_null());
    (finished || has_transcript).then(|| entry.clone())
}

fn flight_key(run_id: &str, tool: &str, args: &Value) -> String {
    let digest = Sha256::digest(args.to_string().as_bytes());
    format!("{}:{}:{:x}", run_id, tool, digest)
}

pub struct IdempotencyGuard {
    guarded: HashMap<String, String>,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<ToolInvocationRecord>>>>,
    retry_delay: Duration,
}

impl IdempotencyGuard {
    pub fn new(guarded: impl IntoIterator<Item = GuardedTool>) -> Self {
        Self {
            guarded: guarded
                .into_iter()
                .map(|g| (g.name, g.state_key))
                .collect(),
            in_flight: Mutex::new(HashMap::new()),
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn is_guarded(&self, tool: &str) -> bool {
        self.guarded.contains_key(tool)
    }

    /// Drop single-flight bookkeeping of a finished run
    pub async fn release_run(&self, run_id: &str) {
        let prefix = format!("{}:", run_id);
        let mut map = self.in_flight.lock().await;
        let before = map.len();
        map.retain(|k, _| !k.starts_with(&prefix));
        log::debug!("Released {} guard entries of run {}", before - map.len(), run_id);
    }

    async fn forget(&self, key: &str, cell: &Arc<OnceCell<ToolInvocationRecord>>) {
        let mut map = self.in_flight.lock().await;
        if map.get(key).is_some_and(|c| Arc::ptr_eq(c, cell)) {
            map.remove(key);
        }
    }

    async fn execute_guarded(
        &self,
        tool: &dyn Tool,
        state_key: &str,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Value> {
        if let Some(hit) = ctx.state.get(state_key).and_then(cached_result) {
            log::info!(
                "Tool {} already completed in run {}, returning cached result",
                tool.name(),
                ctx.run.id()
            );
            return Ok(hit);
        }

        let key = flight_key(ctx.run.id(), tool.name(), &input);
        let cell = {
            let mut map = self.in_flight.lock().await;
            map.entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        // The record itself is shared, so every joiner writes identical state
        let mut ran = false;
        let outcome = {
            let ran = &mut ran;
            let tool_ctx = &mut *ctx;
            cell.get_or_try_init(|| async move {
                *ran = true;
                let result = tool.execute(input, tool_ctx).await?;
                Ok::<_, AdkError>(ToolInvocationRecord::new(tool.name(), result))
            })
            .await
            .cloned()
        };
        // Only a success may answer later calls; anything else is invoked anew
        if !matches!(&outcome, Ok(record) if record.success) {
            self.forget(&key, &cell).await;
        }
        let record = outcome?;
        if !ran {
            log::info!(
                "Tool {} joined an identical in-flight call in run {}",
                tool.name(),
                ctx.run.id()
            );
        }

        if !record.success {
            log::warn!("Tool {} finished without success: {}", tool.name(), record.result);
        }
        ctx.state.update(state_key, serde_json::to_value(&record)?);
        Ok(record.result)
    }

    async fn execute_with_retry(
        &self,
        tool: &dyn Tool,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Value> {
        match tool.execute(input.clone(), ctx).await {
            Ok(v) => Ok(v),
            Err(e) if e.is_validation() || matches!(e, AdkError::Cancelled) => Err(e),
            Err(e) => {
                log::warn!("Tool {} failed, retrying once: {}", tool.name(), e);
                tokio::time::sleep(self.retry_delay).await;
                tool.execute(input, ctx).await
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for IdempotencyGuard {
    async fn execute(
        &self,
        tool: &dyn Tool,
        input: Value,
        ctx: &mut ToolContext<'_>,
    ) -> Result<Value> {
        if ctx.run.is_cancelled() {
            return Err(AdkError::Cancelled);
        }
        match self.guarded.get(tool.name()) {
            Some(state_key) => self.execute_guarded(tool, state_key, input, ctx).await,
            None => self.execute_with_retry(tool, input, ctx).await,
        }
    }
}

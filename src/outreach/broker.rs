// SPDX-License-Identifier: MIT

//! Human Interaction Broker
//!
//! Correlates out-of-band operator responses with the runs waiting on them.
//! One broker is constructed per process and shared by every run and by the
//! HTTP surface. A request leaves `pending` exactly once; afterwards it is
//! immutable until its bookkeeping is released after a grace delay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use uuid::Uuid;

use crate::outreach::config::HumanConfig;
use crate::outreach::notify::{HumanInputNotice, OperatorChannel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingHumanRequest {
    pub request_id: String,
    pub prompt: String,
    pub dedup_key: String,
    /// Run that created the request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub status: RequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created(String),
    /// A pending request already exists under the same dedup key
    Duplicate(String),
}

/// How a wait ended. A timeout is an outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HumanOutcome {
    Resolved(String),
    Cancelled,
    TimedOut,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
enum Resolution {
    Pending,
    Completed(String),
    Cancelled,
}

struct Entry {
    request: PendingHumanRequest,
    tx: watch::Sender<Resolution>,
}

#[derive(Default)]
struct BrokerState {
    requests: HashMap<String, Entry>,
    /// dedup key -> id of the pending request holding it
    active: HashMap<String, String>,
}

/// Dedup key of a prompt within a logical session
pub fn dedup_key(prompt: &str, session_label: &str) -> String {
    let digest = Sha256::digest(prompt.trim().as_bytes());
    format!("{}:{:x}", session_label, digest)
}

#[derive(Clone)]
pub struct HumanInteractionBroker {
    state: Arc<Mutex<BrokerState>>,
    channel: Arc<dyn OperatorChannel>,
    config: HumanConfig,
}

impl HumanInteractionBroker {
    pub fn new(channel: Arc<dyn OperatorChannel>, config: HumanConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            channel,
            config,
        }
    }

    pub fn config(&self) -> &HumanConfig {
        &self.config
    }

    /// Register a pending request, unless one is already pending for the key
    pub async fn create_request(
        &self,
        prompt: &str,
        dedup_key: &str,
        owner: Option<&str>,
    ) -> CreateOutcome {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.active.get(dedup_key) {
            log::info!(
                "Human request {} already pending for {}, suppressing duplicate",
                existing,
                dedup_key
            );
            return CreateOutcome::Duplicate(existing.clone());
        }

        let request_id = Uuid::new_v4().simple().to_string()[..8].to_string();
        let (tx, _) = watch::channel(Resolution::Pending);
        let request = PendingHumanRequest {
            request_id: request_id.clone(),
            prompt: prompt.to_string(),
            dedup_key: dedup_key.to_string(),
            owner: owner.map(str::to_string),
            status: RequestStatus::Pending,
            response: None,
            created_at: Utc::now(),
        };
        state
            .active
            .insert(dedup_key.to_string(), request_id.clone());
        state
            .requests
            .insert(request_id.clone(), Entry { request, tx });
        log::info!("Created human request {}", request_id);
        CreateOutcome::Created(request_id)
    }

    /// Announce a request to operators with bounded, exponentially backed-off
    /// retries. Returns false once attempts are exhausted; the request stays
    /// pending and can still be resolved through the API.
    pub async fn notify_external(&self, request_id: &str) -> bool {
        let Some(request) = self.get(request_id).await else {
            log::warn!("Cannot notify unknown human request {}", request_id);
            return false;
        };
        let notice = HumanInputNotice {
            request_id: request.request_id.clone(),
            prompt: request.prompt.clone(),
            kind: self.config.notice_type.clone(),
            timestamp: Utc::now().to_rfc3339(),
        };

        let attempts = self.config.notify_attempts.max(1);
        for attempt in 0..attempts {
            match self.channel.send(&notice).await {
                Ok(()) => {
                    log::info!("Sent operator notice for human request {}", request_id);
                    return true;
                }
                Err(e) => {
                    log::warn!(
                        "Operator notice for {} failed (attempt {}/{}): {}",
                        request_id,
                        attempt + 1,
                        attempts,
                        e
                    );
                    if attempt + 1 < attempts {
                        let factor = 1 << attempt.min(16);
                        let backoff = self.config.backoff_base_ms.saturating_mul(factor);
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }
        log::error!(
            "Could not notify operators of human request {} after {} attempts; \
             resolve it manually via POST /api/human-input/{}",
            request_id,
            attempts,
            request_id
        );
        false
    }

    /// Wait for a request to leave `pending`, at most `timeout`.
    ///
    /// On timeout the request is cancelled, so a late response is refused.
    pub async fn await_response(&self, request_id: &str, timeout: Duration) -> HumanOutcome {
        let mut rx = {
            let state = self.state.lock().await;
            match state.requests.get(request_id) {
                Some(entry) => entry.tx.subscribe(),
                None => return HumanOutcome::NotFound,
            }
        };

        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|r| *r != Resolution::Pending)
                .await
                .map(|r| (*r).clone())
        })
        .await;

        match waited {
            Ok(Ok(Resolution::Completed(value))) => HumanOutcome::Resolved(value),
            Ok(Ok(_)) => HumanOutcome::Cancelled,
            Ok(Err(_)) => HumanOutcome::NotFound,
            Err(_) => {
                if self.finish(request_id, Resolution::Cancelled).await {
                    log::warn!("Human request {} timed out after {:?}", request_id, timeout);
                    return HumanOutcome::TimedOut;
                }
                // Resolved between the deadline and the cancel
                let current = rx.borrow().clone();
                match current {
                    Resolution::Completed(value) => HumanOutcome::Resolved(value),
                    _ => HumanOutcome::TimedOut,
                }
            }
        }
    }

    /// Resolve a pending request. Unknown or already terminal ids are refused
    /// without any change.
    pub async fn submit_response(&self, request_id: &str, value: &str) -> bool {
        let resolved = self
            .finish(request_id, Resolution::Completed(value.to_string()))
            .await;
        if resolved {
            log::info!("Human response submitted for request {}", request_id);
        } else {
            log::warn!("Invalid request id or request not pending: {}", request_id);
        }
        resolved
    }

    pub async fn cancel_request(&self, request_id: &str) -> bool {
        let cancelled = self.finish(request_id, Resolution::Cancelled).await;
        if cancelled {
            log::info!("Human request cancelled: {}", request_id);
        }
        cancelled
    }

    /// Cancel every pending request created by a run
    pub async fn cancel_run(&self, run_id: &str) -> usize {
        let owned: Vec<String> = {
            let state = self.state.lock().await;
            state
                .requests
                .values()
                .filter(|e| {
                    e.request.status == RequestStatus::Pending
                        && e.request.owner.as_deref() == Some(run_id)
                })
                .map(|e| e.request.request_id.clone())
                .collect()
        };
        let mut cancelled = 0;
        for id in owned {
            if self.cancel_request(&id).await {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Move a pending request to a terminal status exactly once
    async fn finish(&self, request_id: &str, resolution: Resolution) -> bool {
        {
            let mut state = self.state.lock().await;
            let BrokerState { requests, active } = &mut *state;
            let Some(entry) = requests.get_mut(request_id) else {
                return false;
            };
            if entry.request.status != RequestStatus::Pending {
                return false;
            }
            match &resolution {
                Resolution::Completed(value) => {
                    entry.request.status = RequestStatus::Completed;
                    entry.request.response = Some(value.clone());
                }
                _ => entry.request.status = RequestStatus::Cancelled,
            }
            entry.tx.send_replace(resolution);
            if active.get(&entry.request.dedup_key).map(String::as_str) == Some(request_id) {
                active.remove(&entry.request.dedup_key);
            }
        }
        self.schedule_cleanup(request_id.to_string());
        true
    }

    fn schedule_cleanup(&self, request_id: String) {
        let state = self.state.clone();
        let grace = Duration::from_millis(self.config.cleanup_grace_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let mut state = state.lock().await;
            if state
                .requests
                .get(&request_id)
                .is_some_and(|e| e.request.status != RequestStatus::Pending)
            {
                state.requests.remove(&request_id);
                log::debug!("Released human request {}", request_id);
            }
        });
    }

    pub async fn get(&self, request_id: &str) -> Option<PendingHumanRequest> {
        let state = self.state.lock().await;
        state.requests.get(request_id).map(|e| e.request.clone())
    }

    pub async fn is_pending(&self, dedup_key: &str) -> bool {
        self.state.lock().await.active.contains_key(dedup_key)
    }

    /// Pending requests, oldest first
    pub async fn pending_requests(&self) -> Vec<PendingHumanRequest> {
        let state = self.state.lock().await;
        let mut out: Vec<PendingHumanRequest> = state
            .requests
            .values()
            .filter(|e| e.request.status == RequestStatus::Pending)
            .map(|e| e.request.clone())
            .collect();
        out.sort_by_key(|r| r.created_at);
        out
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::adk::error::{AdkError, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records notices; fails the first `fail_first` sends
    #[derive(Default)]
    pub struct RecordingChannel {
        pub fail_first: usize,
        pub calls: AtomicUsize,
        pub notices: std::sync::Mutex<Vec<HumanInputNotice>>,
    }

    impl RecordingChannel {
        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl OperatorChannel for RecordingChannel {
        async fn send(&self, notice: &HumanInputNotice) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(AdkError::Delivery {
                    target: "test".into(),
                    message: "refused".into(),
                });
            }
            self.notices.lock().unwrap().push(notice.clone());
            Ok(())
        }
    }

    pub fn fast_config() -> HumanConfig {
        HumanConfig {
            timeout_secs: 2,
            notify_attempts: 3,
            backoff_base_ms: 10,
            cleanup_grace_ms: 50,
            recheck_delay_ms: 20,
            notice_type: "website_creation".into(),
        }
    }

    pub fn broker(channel: Arc<RecordingChannel>) -> HumanInteractionBroker {
        HumanInteractionBroker::new(channel, fast_config())
    }
}

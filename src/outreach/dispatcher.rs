// SPDX-License-Identifier: MIT

//! Side-effect Dispatcher
//!
//! Fires once when a run's root sequence finishes. Extracts designated state
//! keys, forwards one notification per entity to the dashboard and writes an
//! audit artifact. Nothing here can fail the run: every delivery or write
//! error is logged and dropped.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::adk::agent::AfterAgentHook;
use crate::adk::context::RunHandle;
use crate::adk::error::{AdkError, Result};
use crate::adk::parse::parse_structured;
use crate::adk::state::SessionState;

pub const HOOK_NAME: &str = "side_effect_dispatcher";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// `agent_type` field of every record
    pub agent_type: String,
    /// State key holding the entity (object) or entities (array)
    pub entity_key: String,
    /// State keys copied, parsed, into each record's data
    pub extract_keys: Vec<String>,
    pub success_status: String,
    pub failure_status: String,
    pub artifact_name: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            agent_type: "sdr".to_string(),
            entity_key: "business_data".to_string(),
            extract_keys: vec!["email_sent_result".to_string()],
            success_status: "contacted".to_string(),
            failure_status: "failed".to_string(),
            artifact_name: "final_lead_results".to_string(),
        }
    }
}

/// Body POSTed to the notification sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub agent_type: String,
    #[serde(rename = "business_id")]
    pub entity_id: Value,
    pub status: String,
    pub message: String,
    pub timestamp: String,
    pub data: Value,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, record: &NotificationRecord) -> Result<()>;
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, run_id: &str, name: &str, payload: &Value) -> Result<()>;
}

/// POSTs records to `{base_url}/agent_callback`
pub struct HttpNotificationSink {
    client: Client,
    url: String,
}

impl HttpNotificationSink {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/agent_callback", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl NotificationSink for HttpNotificationSink {
    async fn deliver(&self, record: &NotificationRecord) -> Result<()> {
        let delivery_error = |message: String| AdkError::Delivery {
            target: self.url.clone(),
            message,
        };
        let resp = self
            .client
            .post(&self.url)
            .json(record)
            .send()
            .await
            .map_err(|e| delivery_error(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(delivery_error(format!("status {}: {}", status, body)));
        }
        Ok(())
    }
}

/// Writes `<root>/<run_id>/<name>.json`
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn save(&self, run_id: &str, name: &str, payload: &Value) -> Result<()> {
        let dir = self.root.join(run_id);
        tokio::fs::create_dir_all(&dir).await?;
        let body = serde_json::to_vec_pretty(payload)?;
        tokio::fs::write(dir.join(format!("{}.json", name)), body).await?;
        Ok(())
    }
}

pub struct SideEffectDispatcher {
    config: DispatchConfig,
    sink: Arc<dyn NotificationSink>,
    artifacts: Arc<dyn ArtifactStore>,
}

impl SideEffectDispatcher {
    pub fn new(
        config: DispatchConfig,
        sink: Arc<dyn NotificationSink>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            config,
            sink,
            artifacts,
        }
    }

    /// Parsed values of the extract keys present in state
    fn extracted(&self, state: &SessionState) -> Map<String, Value> {
        self.config
            .extract_keys
            .iter()
            .filter_map(|key| {
                state
                    .get_present(key)
                    .map(|v| (key.clone(), parse_structured(v)))
            })
            .collect()
    }

    fn entities(&self, state: &SessionState) -> Vec<Value> {
        match state.get_present(&self.config.entity_key).map(parse_structured) {
            Some(Value::Array(items)) => items,
            Some(entity) => vec![entity],
            None => {
                log::warn!(
                    "No '{}' in state, nothing to report per entity",
                    self.config.entity_key
                );
                Vec::new()
            }
        }
    }

    /// Build the records a finished run reports
    pub fn build_records(
        &self,
        state: &SessionState,
        outcome: std::result::Result<&Value, &AdkError>,
    ) -> Vec<NotificationRecord> {
        let extracted = self.extracted(state);
        let email = find_email(&extracted);
        let timestamp = Utc::now().to_rfc3339();

        let mut records: Vec<NotificationRecord> = self
            .entities(state)
            .iter()
            .map(|entity| {
                let data = entity_data(entity, &extracted, email.as_ref());
                let name = data["name"].as_str().unwrap_or("unknown").to_string();
                let (status, message) = match (outcome, &email) {
                    (Err(e), _) => (
                        self.config.failure_status.clone(),
                        format!("Outreach failed for {}: {}", name, e),
                    ),
                    (Ok(_), Some(email)) if !email.to.is_empty() => (
                        self.config.success_status.clone(),
                        format!("Sent outreach email to {} at {}", name, email.to),
                    ),
                    (Ok(_), _) => (
                        self.config.success_status.clone(),
                        format!("Completed outreach for {}", name),
                    ),
                };
                NotificationRecord {
                    agent_type: self.config.agent_type.clone(),
                    entity_id: entity.get("id").cloned().unwrap_or(Value::Null),
                    status,
                    message,
                    timestamp: timestamp.clone(),
                    data,
                }
            })
            .collect();

        // A failed run is reported even without an entity to attach it to
        if let (Err(e), true) = (outcome, records.is_empty()) {
            records.push(NotificationRecord {
                agent_type: self.config.agent_type.clone(),
                entity_id: Value::Null,
                status: self.config.failure_status.clone(),
                message: format!("Run failed: {}", e),
                timestamp,
                data: json!({ "error": e.to_string() }),
            });
        }
        records
    }

    async fn dispatch(
        &self,
        run: &RunHandle,
        state: &SessionState,
        outcome: std::result::Result<&Value, &AdkError>,
    ) {
        let records = self.build_records(state, outcome);
        for record in &records {
            match self.sink.deliver(record).await {
                Ok(()) => log::info!(
                    "Delivered {} notification for run {}",
                    record.status,
                    run.id()
                ),
                Err(e) => log::error!("Notification for run {} not delivered: {}", run.id(), e),
            }
        }

        let status = if outcome.is_ok() { "completed" } else { "failed" };
        let mut payload = json!({
            "run_id": run.id(),
            "label": run.label(),
            "status": status,
            "entities": self.entities(state),
            "results": Value::Object(self.extracted(state)),
            "notifications": records,
        });
        if let Err(e) = outcome {
            payload["error"] = json!(e.to_string());
        }
        match self
            .artifacts
            .save(run.id(), &self.config.artifact_name, &payload)
            .await
        {
            Ok(()) => log::info!(
                "Saved artifact {} for run {}",
                self.config.artifact_name,
                run.id()
            ),
            Err(e) => log::error!("Could not save artifact for run {}: {}", run.id(), e),
        }
    }
}

#[async_trait]
impl AfterAgentHook for SideEffectDispatcher {
    fn name(&self) -> &str {
        HOOK_NAME
    }

    async fn on_complete(
        &self,
        run: &RunHandle,
        state: &SessionState,
        outcome: std::result::Result<&Value, &AdkError>,
    ) {
        self.dispatch(run, state, outcome).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
struct EmailSummary {
    to: String,
    subject: Option<String>,
    body_preview: String,
}

/// Find a drafted email (`to`/`subject`/`body`) among the extracted results,
/// either at the top level or nested under `crafted_email`
fn find_email(extracted: &Map<String, Value>) -> Option<EmailSummary> {
    fn from_value(v: &Value) -> Option<EmailSummary> {
        let v = parse_structured(v);
        if let Some(nested) = v.get("crafted_email").and_then(from_value) {
            return Some(nested);
        }
        if let Some(nested) = v.get("email_sent_result").and_then(from_value) {
            return Some(nested);
        }
        let obj = v.as_object()?;
        if !obj.contains_key("to") && !obj.contains_key("subject") {
            return None;
        }
        Some(EmailSummary {
            to: obj.get("to").and_then(Value::as_str).unwrap_or_default().to_string(),
            subject: obj.get("subject").and_then(Value::as_str).map(str::to_string),
            body_preview: obj
                .get("body")
                .and_then(Value::as_str)
                .map(|b| b.trim().chars().take(50).collect())
                .unwrap_or_default(),
        })
    }
    extracted.values().find_map(from_value)
}

/// City from an address shaped like "Street, City, State, Zip"
fn city_from_address(address: &str) -> Option<String> {
    address
        .split(',')
        .map(str::trim)
        .nth(1)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn entity_data(
    entity: &Value,
    extracted: &Map<String, Value>,
    email: Option<&EmailSummary>,
) -> Value {
    let mut data = Map::new();
    for field in ["name", "city", "phone", "email"] {
        data.insert(field.to_string(), entity.get(field).cloned().unwrap_or(Value::Null));
    }
    if data["city"].is_null() {
        if let Some(city) = entity
            .get("address")
            .and_then(Value::as_str)
            .and_then(city_from_address)
        {
            data.insert("city".to_string(), json!(city));
        }
    }
    if let Some(email) = email {
        if !email.to.is_empty() {
            data.insert("email".to_string(), json!(email.to));
        }
        data.insert("email_subject".to_string(), json!(email.subject));
        data.insert("body_preview".to_string(), json!(email.body_preview));
    }
    for (key, value) in extracted {
        data.insert(key.clone(), value.clone());
    }
    Value::Object(data)
}

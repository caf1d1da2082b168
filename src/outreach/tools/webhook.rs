// SPDX-License-Identifier: MIT

//! Capability tool backed by an HTTP endpoint
//!
//! The arguments are POSTed as a JSON body; the JSON reply is the tool's
//! result. A non-JSON reply is wrapped as `{"text": ...}`.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use crate::adk::error::{AdkError, Result};
use crate::adk::tool::{Tool, ToolContext};

pub struct WebhookTool {
    name: String,
    description: String,
    url: String,
    schema: Value,
    output_schema: Option<Value>,
    client: Client,
}

impl WebhookTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
        schema: Value,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            name: name.into(),
            description: description.into(),
            url: url.into(),
            schema,
            output_schema: None,
            client,
        })
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

#[async_trait]
impl Tool for WebhookTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &Value {
        &self.schema
    }

    fn output_schema(&self) -> Option<&Value> {
        self.output_schema.as_ref()
    }

    async fn execute(&self, input: Value, ctx: &mut ToolContext<'_>) -> Result<Value> {
        log::debug!("{} -> POST {} (run {})", self.name, self.url, ctx.run.id());
        let resp = self
            .client
            .post(&self.url)
            .header("X-Run-Id", ctx.run.id())
            .json(&input)
            .send()
            .await
            .map_err(|e| AdkError::capability(&self.name, e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| AdkError::capability(&self.name, e.to_string()))?;
        if !status.is_success() {
            return Err(AdkError::capability(
                &self.name,
                format!("status {}: {}", status, text),
            ));
        }

        Ok(serde_json::from_str(&text).unwrap_or_else(|_| json!({ "text": text })))
    }
}

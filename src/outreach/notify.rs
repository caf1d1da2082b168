// SPDX-License-Identifier: MIT

//! Outbound channel announcing human-input requests to operators

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::adk::error::{AdkError, Result};

/// Body POSTed to the operator-facing consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanInputNotice {
    pub request_id: String,
    pub prompt: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
}

#[async_trait]
pub trait OperatorChannel: Send + Sync {
    async fn send(&self, notice: &HumanInputNotice) -> Result<()>;
}

/// POSTs notices to `{base_url}/api/human-input`
pub struct HttpOperatorChannel {
    client: Client,
    url: String,
}

impl HttpOperatorChannel {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/api/human-input", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl OperatorChannel for HttpOperatorChannel {
    async fn send(&self, notice: &HumanInputNotice) -> Result<()> {
        let resp = self
            .client
            .post(&self.url)
            .json(notice)
            .send()
            .await
            .map_err(|e| AdkError::Delivery {
                target: self.url.clone(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(AdkError::Delivery {
                target: self.url.clone(),
                message: format!("status {}", resp.status()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notice_wire_format() {
        let notice = HumanInputNotice {
            request_id: "ab12cd34".into(),
            prompt: "Build a site".into(),
            kind: "website_creation".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
        };
        assert_eq!(
            serde_json::to_value(&notice).unwrap(),
            json!({
                "request_id": "ab12cd34",
                "prompt": "Build a site",
                "type": "website_creation",
                "timestamp": "2026-01-01T00:00:00Z"
            })
        );
    }

    #[test]
    fn test_url_is_normalised() {
        let channel = HttpOperatorChannel::new("http://ui:8000/", Duration::from_secs(1)).unwrap();
        assert_eq!(channel.url, "http://ui:8000/api/human-input");
    }

    #[tokio::test]
    async fn test_unreachable_consumer_is_delivery_error() {
        let channel =
            HttpOperatorChannel::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let notice = HumanInputNotice {
            request_id: "x".into(),
            prompt: "p".into(),
            kind: "website_creation".into(),
            timestamp: "t".into(),
        };
        let err = channel.send(&notice).await.unwrap_err();
        assert!(matches!(err, AdkError::Delivery { .. }));
    }
}

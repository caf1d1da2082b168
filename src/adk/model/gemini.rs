// SPDX-License-Identifier: MIT

//! Gemini Model - Google's Gemini API implementation

use super::{Content, GenerationConfig, Model, ModelRequest, Part};
use crate::adk::error::{AdkError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini model implementation
pub struct GeminiModel {
    client: Client,
    api_key: String,
    model_name: String,
}

impl GeminiModel {
    /// Requires `GOOGLE_API_KEY` to be set.
    pub fn new(model_name: impl Into<String>) -> Result<Self> {
        let api_key =
            env::var("GOOGLE_API_KEY").map_err(|_| AdkError::config("GOOGLE_API_KEY must be set"))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model_name: model_name.into(),
        })
    }

    fn request_body(&self, request: &ModelRequest<'_>) -> Value {
        let contents: Vec<Value> = request
            .history
            .iter()
            .map(|c| {
                let parts: Vec<Value> = c.parts.iter().map(part_to_gemini_json).collect();
                json!({ "role": c.role, "parts": parts })
            })
            .collect();

        let mut body = json!({ "contents": contents });

        if let Some(system) = request.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        if let Some(config) = request.config {
            body["generationConfig"] = generation_config_json(config);
        }
        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name(),
                        "description": t.description(),
                        "parameters": t.schema()
                    })
                })
                .collect();
            body["tools"] = json!([{ "function_declarations": declarations }]);
        }
        body
    }
}

#[async_trait]
impl Model for GeminiModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    async fn generate_content(&self, request: ModelRequest<'_>) -> Result<Content> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            API_BASE, self.model_name, self.api_key
        );
        let body = self.request_body(&request);
        log::debug!(
            "Gemini request body: {}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await?;
            return Err(AdkError::capability(
                &self.model_name,
                format!("Gemini API error {}: {}", status, text),
            ));
        }

        let resp_json: Value = resp.json().await?;
        parse_response(&self.model_name, &resp_json)
    }
}

fn generation_config_json(config: &GenerationConfig) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(t) = config.temperature {
        out.insert("temperature".into(), json!(t));
    }
    if let Some(p) = config.top_p {
        out.insert("topP".into(), json!(p));
    }
    if let Some(k) = config.top_k {
        out.insert("topK".into(), json!(k));
    }
    if let Some(m) = config.max_output_tokens {
        out.insert("maxOutputTokens".into(), json!(m));
    }
    Value::Object(out)
}

fn parse_response(model: &str, resp_json: &Value) -> Result<Content> {
    let candidate = resp_json["candidates"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| AdkError::capability(model, "no candidates in response"))?;

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        log::debug!("Gemini finish reason: {}", reason);
        if reason == "SAFETY" {
            return Err(AdkError::capability(model, "response blocked by safety filters"));
        }
    }

    let parts_json = candidate["content"]["parts"].as_array().ok_or_else(|| {
        AdkError::capability(model, format!("no parts in candidate: {}", candidate))
    })?;

    Ok(Content {
        role: "model".to_string(),
        parts: parts_json.iter().filter_map(parse_gemini_part).collect(),
    })
}

/// Serialize a Part to Gemini API JSON format
pub fn part_to_gemini_json(part: &Part) -> Value {
    match part {
        Part::Text(t) => json!({ "text": t }),
        Part::FunctionCall {
            name,
            args,
            thought_signature,
        } => {
            let mut fc = json!({ "functionCall": { "name": name, "args": args } });
            if let Some(sig) = thought_signature {
                fc["thoughtSignature"] = json!(sig);
            }
            fc
        }
        Part::FunctionResponse { name, response } => {
            json!({ "functionResponse": { "name": name, "response": response } })
        }
    }
}

/// Parse a Gemini API JSON part; thought-only parts are dropped
pub fn parse_gemini_part(p: &Value) -> Option<Part> {
    if let Some(text) = p["text"].as_str() {
        if p.get("thought").and_then(Value::as_bool) == Some(true) {
            return None;
        }
        return Some(Part::Text(text.to_string()));
    }
    let fc = p.get("functionCall")?;
    Some(Part::FunctionCall {
        name: fc["name"].as_str().unwrap_or_default().to_string(),
        args: fc["args"].clone(),
        thought_signature: p
            .get("thoughtSignature")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_call_preserves_thought_signature() {
        let received = json!({
            "functionCall": {"name": "phone_call_tool", "args": {"destination": "+1"}},
            "thoughtSignature": "sig-1"
        });
        let part = parse_gemini_part(&received).unwrap();
        let sent = part_to_gemini_json(&part);

        assert_eq!(sent["thoughtSignature"], "sig-1");
        assert_eq!(sent["functionCall"]["args"]["destination"], "+1");
    }

    #[test]
    fn test_thought_text_is_dropped() {
        assert!(parse_gemini_part(&json!({"text": "hmm", "thought": true})).is_none());
        match parse_gemini_part(&json!({"text": "Hello"})) {
            Some(Part::Text(t)) => assert_eq!(t, "Hello"),
            other => panic!("unexpected part: {other:?}"),
        }
    }

    #[test]
    fn test_generation_config_uses_camel_case() {
        let cfg = GenerationConfig {
            temperature: Some(0.2),
            top_p: Some(0.95),
            top_k: Some(40),
            max_output_tokens: None,
        };
        let json = generation_config_json(&cfg);
        assert_eq!(json["topK"], 40);
        assert!(json.get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_parse_response_requires_candidates() {
        let err = parse_response("m", &json!({"candidates": []})).unwrap_err();
        assert!(err.to_string().contains("no candidates"));

        let ok = parse_response(
            "m",
            &json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]}),
        )
        .unwrap();
        assert_eq!(ok.text(), "hi");
    }
}

// SPDX-License-Identifier: MIT

//! Process configuration: optional YAML file, then environment overrides

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::adk::error::{AdkError, Result};
use crate::adk::model::GenerationConfig;
use crate::adk::state::ConflictPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutreachConfig {
    /// Dashboard receiving run notifications
    pub ui_client_url: String,
    /// Operator-facing consumer of human-input requests
    pub human_input_url: String,
    pub port: u16,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub artifact_dir: PathBuf,
    pub human: HumanConfig,
    pub sink_timeout_secs: u64,
    pub conflict_policy: ConflictPolicy,
    /// Finished runs stay queryable this long
    pub run_retention_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HumanConfig {
    pub timeout_secs: u64,
    pub notify_attempts: u32,
    pub backoff_base_ms: u64,
    pub cleanup_grace_ms: u64,
    pub recheck_delay_ms: u64,
    /// `type` field of outbound notices
    pub notice_type: String,
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            ui_client_url: "http://127.0.0.1:8000".to_string(),
            human_input_url: "http://127.0.0.1:8000".to_string(),
            port: 8084,
            model: "gemini-2.0-flash-lite".to_string(),
            temperature: 0.2,
            top_p: 0.95,
            top_k: 40,
            artifact_dir: PathBuf::from("artifacts"),
            human: HumanConfig::default(),
            sink_timeout_secs: 10,
            conflict_policy: ConflictPolicy::Reject,
            run_retention_secs: 600,
        }
    }
}

impl Default for HumanConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            notify_attempts: 3,
            backoff_base_ms: 1000,
            cleanup_grace_ms: 2000,
            recheck_delay_ms: 2000,
            notice_type: "website_creation".to_string(),
        }
    }
}

impl HumanConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl OutreachConfig {
    /// Load from an optional YAML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                serde_yaml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = env::var("UI_CLIENT_SERVICE_URL") {
            self.ui_client_url = url;
        }
        if let Ok(url) = env::var("HUMAN_INPUT_URL") {
            self.human_input_url = url;
        }
        if let Ok(model) = env::var("MODEL") {
            self.model = model;
        }
        if let Ok(dir) = env::var("ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(dir);
        }
        override_parsed("PORT", &mut self.port)?;
        override_parsed("TEMPERATURE", &mut self.temperature)?;
        override_parsed("TOP_P", &mut self.top_p)?;
        override_parsed("TOP_K", &mut self.top_k)?;
        override_parsed("HUMAN_TIMEOUT_SECS", &mut self.human.timeout_secs)?;
        override_parsed("RUN_RETENTION_SECS", &mut self.run_retention_secs)?;
        Ok(())
    }

    pub fn generation_config(&self) -> GenerationConfig {
        GenerationConfig {
            temperature: Some(self.temperature),
            top_p: Some(self.top_p),
            top_k: Some(self.top_k),
            max_output_tokens: None,
        }
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_secs(self.sink_timeout_secs)
    }

    pub fn run_retention(&self) -> Duration {
        Duration::from_secs(self.run_retention_secs)
    }
}

fn override_parsed<T: FromStr>(var: &str, target: &mut T) -> Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = env::var(var) {
        *target = raw
            .trim()
            .parse()
            .map_err(|e| AdkError::config(format!("{} is invalid ({}): {}", var, raw, e)))?;
    }
    Ok(())
}

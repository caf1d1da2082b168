// SPDX-License-Identifier: MIT

//! Argument checks that run before a tool call, ahead of the idempotency guard

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;

use crate::adk::error::Result;
use crate::adk::tool::{BeforeToolHook, HookDecision, Tool, ToolContext};

/// A pre-invocation check declared by a pipeline
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckDef {
    PhoneNumber(PhoneCheckDef),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PhoneCheckDef {
    /// Tools whose arguments are checked
    pub tools: Vec<String>,
    /// Argument holding the number
    #[serde(default = "default_phone_arg")]
    pub arg: String,
    /// Country calling code assumed for numbers without a `+` prefix
    #[serde(default = "default_country_code")]
    pub country_code: String,
}

fn default_phone_arg() -> String {
    "phone".to_string()
}

fn default_country_code() -> String {
    "1".to_string()
}

impl CheckDef {
    pub fn into_hook(self) -> Arc<dyn BeforeToolHook> {
        match self {
            CheckDef::PhoneNumber(def) => Arc::new(PhoneNumberCheck::new(def)),
        }
    }
}

/// Normalises a phone number argument to E.164 and refuses numbers that
/// cannot be dialled
pub struct PhoneNumberCheck {
    tools: HashSet<String>,
    arg: String,
    country_code: String,
}

impl PhoneNumberCheck {
    pub fn new(def: PhoneCheckDef) -> Self {
        Self {
            tools: def.tools.into_iter().collect(),
            arg: def.arg,
            country_code: def.country_code,
        }
    }
}

/// E.164 form of `raw`, or why it is not dialable
pub fn normalize_phone(raw: &str, country_code: &str) -> std::result::Result<String, String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.is_empty() {
        return Err(format!("no digits in '{}'", raw));
    }

    let full = if trimmed.starts_with('+') {
        digits
    } else if let Some(rest) = trimmed.strip_prefix("00") {
        rest.chars().filter(char::is_ascii_digit).collect()
    } else if country_code == "1" && digits.len() == 11 && digits.starts_with('1') {
        digits
    } else if country_code == "1" {
        format!("1{}", digits)
    } else {
        // Drop the national trunk prefix
        format!("{}{}", country_code, digits.trim_start_matches('0'))
    };

    if !(8..=15).contains(&full.len()) {
        return Err(format!("'{}' has {} digits, expected 8 to 15", raw, full.len()));
    }
    // North American numbers: 1 + 10 digits, area code not starting with 0 or 1
    if let Some(national) = full.strip_prefix('1') {
        if national.len() != 10 {
            return Err(format!("'{}' is not a 10 digit North American number", raw));
        }
        if national.starts_with('0') || national.starts_with('1') {
            return Err(format!(
                "invalid area code {}: area codes cannot start with 0 or 1",
                &national[..3]
            ));
        }
    }
    Ok(format!("+{}", full))
}

#[async_trait]
impl BeforeToolHook for PhoneNumberCheck {
    fn name(&self) -> &str {
        "phone_number_check"
    }

    async fn before_tool(
        &self,
        tool: &dyn Tool,
        args: &mut Value,
        _ctx: &ToolContext<'_>,
    ) -> Result<HookDecision> {
        if !self.tools.contains(tool.name()) {
            return Ok(HookDecision::Proceed);
        }
        let Some(raw) = args.get(&self.arg).and_then(Value::as_str).map(str::to_string) else {
            log::warn!("No {} argument for tool {}", self.arg, tool.name());
            return Ok(HookDecision::Proceed);
        };

        match normalize_phone(&raw, &self.country_code) {
            Ok(normalized) => {
                if normalized != raw {
                    log::info!("Phone number normalized: {} -> {}", raw, normalized);
                    args[self.arg.as_str()] = json!(normalized);
                }
                Ok(HookDecision::Proceed)
            }
            Err(reason) => {
                log::error!("Phone number validation failed for {}: {}", tool.name(), reason);
                Ok(HookDecision::Respond(json!({
                    "status": "failed",
                    "error": format!("phone number validation failed: {}", reason)
                })))
            }
        }
    }
}

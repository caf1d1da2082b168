// SPDX-License-Identifier: MIT

//! Defensive parsing of model output and `{key}` templating over session state

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::adk::error::{AdkError, Result};
use crate::adk::state::{value_to_text, SessionState};

static FENCE: Lazy<Option<Regex>> = Lazy::new(|| compile(r"```(?:json|JSON)?\s*([\s\S]*?)\s*```"));

static PLACEHOLDER: Lazy<Option<Regex>> =
    Lazy::new(|| compile(r"\{([A-Za-z_][A-Za-z0-9_.]*)(\?)?\}"));

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            log::error!("Invalid pattern '{}': {}", pattern, e);
            None
        }
    }
}

/// Inner text of the first fenced code block, if any
pub fn strip_fence(text: &str) -> Option<&str> {
    let re = FENCE.as_ref()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Turn a stage output into structured data when it holds any.
///
/// Non-strings pass through. Strings are trimmed, unwrapped from a fenced
/// block if present and parsed as JSON; if that fails the original string
/// comes back unchanged.
pub fn parse_structured(value: &Value) -> Value {
    let Value::String(raw) = value else {
        return value.clone();
    };
    let trimmed = raw.trim();
    let candidate = strip_fence(trimmed).unwrap_or(trimmed);

    match serde_json::from_str::<Value>(candidate) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::warn!(
                "Could not parse structured payload ({}), keeping raw text: {:.80}",
                e,
                raw
            );
            value.clone()
        }
    }
}

/// Wrap JSON in a fenced block, the way models commonly emit it
pub fn fence(value: &Value) -> String {
    format!("```json\n{}\n```", value)
}

/// Look up a dotted path (e.g. "business_data.phone") inside a JSON value
pub fn extract_json_path(json: &Value, path: &str) -> Option<Value> {
    let mut current = json;
    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            other => other.get(part)?,
        };
    }
    Some(current.clone())
}

/// Substitute `{key}`, `{key.path}` and `{key?}` placeholders from state.
///
/// A required placeholder whose key is absent is a validation error; the
/// optional form renders as empty text.
pub fn render_template(template: &str, state: &SessionState) -> Result<String> {
    let Some(re) = PLACEHOLDER.as_ref() else {
        return Ok(template.to_string());
    };

    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in re.captures_iter(template) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let optional = caps.get(2).is_some();
        out.push_str(&template[last..whole.start()]);

        match state.get_path(path.as_str()).filter(|v| !v.is_null()) {
            Some(value) => out.push_str(&value_to_text(value)),
            None if optional => {}
            None => return Err(AdkError::missing_key(path.as_str())),
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

/// Render every string leaf of a JSON value as a template
pub fn render_value(value: &Value, state: &SessionState) -> Result<Value> {
    Ok(match value {
        Value::String(s) => {
            // A lone placeholder keeps the referenced value's JSON type
            if let Some(v) = lone_placeholder(s).and_then(|p| state.get_path(p)) {
                v.clone()
            } else {
                Value::String(render_template(s, state)?)
            }
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(v, state))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), render_value(v, state)?)))
                .collect::<Result<_>>()?,
        ),
        other => other.clone(),
    })
}

fn lone_placeholder(s: &str) -> Option<&str> {
    let re = PLACEHOLDER.as_ref()?;
    let caps = re.captures(s)?;
    let whole = caps.get(0)?;
    if whole.start() != 0 || whole.end() != s.len() || caps.get(2).is_some() {
        return None;
    }
    caps.get(1).map(|m| m.as_str())
}

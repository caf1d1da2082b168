// SPDX-License-Identifier: MIT

//! YAML schema types for pipeline definitions

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::adk::agent::ExhaustionPolicy;
use crate::adk::state::StateSchema;
use crate::outreach::dispatcher::DispatchConfig;
use crate::outreach::hooks::CheckDef;

/// Top-level pipeline definition
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Declared session state keys
    #[serde(default)]
    pub state: StateSchema,
    /// Dotted path into the run input used as the session label
    pub label_key: Option<String>,
    /// External capabilities reachable over HTTP
    #[serde(default)]
    pub tools: Vec<ToolDef>,
    /// Argument checks run before every tool call, in order
    #[serde(default)]
    pub checks: Vec<CheckDef>,
    /// Enables the built-in `request_human_input` tool
    pub human: Option<HumanToolDef>,
    /// Enables the side-effect dispatcher on the root sequence
    pub dispatch: Option<DispatchConfig>,
    pub root: NodeDef,
}

/// A webhook-backed capability
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub url: String,
    #[serde(default = "default_input_schema")]
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    /// Effectful tools run at most once per run
    #[serde(default)]
    pub effectful: bool,
    /// Where the invocation record of an effectful tool is kept
    pub state_key: Option<String>,
    pub timeout_secs: Option<u64>,
}

impl ToolDef {
    pub fn record_key(&self) -> String {
        self.state_key
            .clone()
            .unwrap_or_else(|| format!("{}_invocation", self.name))
    }
}

fn default_input_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HumanToolDef {
    /// Receives the operator's response
    pub result_key: String,
    /// Nulled once the interaction ends
    pub clear_key: Option<String>,
    /// Set to whether a response arrived, for routing on timeout or cancel
    pub outcome_key: Option<String>,
}

/// A node of the task tree, tagged by `kind`
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeDef {
    Llm(LlmNodeDef),
    Tool(ToolNodeDef),
    Sequential(CompositeNodeDef),
    Parallel(CompositeNodeDef),
    Loop(LoopNodeDef),
    Router(RouterNodeDef),
}

impl NodeDef {
    pub fn name(&self) -> &str {
        match self {
            NodeDef::Llm(n) => &n.name,
            NodeDef::Tool(n) => &n.name,
            NodeDef::Sequential(n) | NodeDef::Parallel(n) => &n.name,
            NodeDef::Loop(n) => &n.name,
            NodeDef::Router(n) => &n.name,
        }
    }

    /// Direct children, in declaration order
    pub fn children(&self) -> Vec<&NodeDef> {
        match self {
            NodeDef::Llm(_) | NodeDef::Tool(_) => Vec::new(),
            NodeDef::Sequential(n) | NodeDef::Parallel(n) => n.agents.iter().collect(),
            NodeDef::Loop(n) => n.agents.iter().collect(),
            NodeDef::Router(n) => vec![n.on_true.as_ref(), n.on_false.as_ref()],
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct OutputDef {
    /// Receives the raw result
    pub output_key: Option<String>,
    /// State key -> dotted path inside the parsed result
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmNodeDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub instruction: String,
    #[serde(default)]
    pub tools: Vec<String>,
    pub max_turns: Option<usize>,
    #[serde(flatten)]
    pub output: OutputDef,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ToolNodeDef {
    pub name: String,
    pub tool: String,
    /// String leaves may reference state with `{key}`
    #[serde(default)]
    pub args: Value,
    #[serde(flatten)]
    pub output: OutputDef,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CompositeNodeDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agents: Vec<NodeDef>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoopNodeDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub agents: Vec<NodeDef>,
    #[serde(default)]
    pub gate: GateDef,
    pub max_iterations: u32,
    #[serde(default)]
    pub on_exhausted: ExhaustionPolicy,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GateDef {
    pub key: String,
    pub pass: String,
}

impl Default for GateDef {
    fn default() -> Self {
        Self {
            key: "quality_status".to_string(),
            pass: "pass".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RouterNodeDef {
    pub name: String,
    /// Boolean classification key
    pub key: String,
    pub on_true: Box<NodeDef>,
    pub on_false: Box<NodeDef>,
}

// SPDX-License-Identifier: MIT

//! Capability registry, resolved when pipelines are built

use crate::adk::error::{AdkError, Result, ValidationError};
use crate::adk::tool::Tool;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Typed signature of a registered capability
#[derive(Debug, Clone, Serialize)]
pub struct ToolSignature {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn Tool>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a tool; a tool of the same name is replaced
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let mut tools = self.tools.write().await;
        if tools.insert(tool.name().to_string(), tool.clone()).is_some() {
            log::warn!("Tool {} registered twice, keeping the latest", tool.name());
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        let tools = self.tools.read().await;
        tools.get(name).cloned()
    }

    /// Look up a tool a pipeline depends on
    pub async fn resolve(&self, name: &str) -> Result<Arc<dyn Tool>> {
        self.get(name)
            .await
            .ok_or_else(|| AdkError::Validation(ValidationError::UnresolvedTool(name.to_string())))
    }

    pub async fn resolve_all(&self, names: &[String]) -> Result<Vec<Arc<dyn Tool>>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            out.push(self.resolve(name).await?);
        }
        Ok(out)
    }

    /// Signatures of every registered tool, sorted by name
    pub async fn signatures(&self) -> Vec<ToolSignature> {
        let tools = self.tools.read().await;
        let mut out: Vec<ToolSignature> = tools
            .values()
            .map(|t| ToolSignature {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.schema().clone(),
                output_schema: t.output_schema().cloned(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::tool::ToolContext;
    use async_trait::async_trait;
    use once_cell::sync::Lazy;
    use serde_json::json;

    static MOCK_SCHEMA: Lazy<Value> = Lazy::new(|| {
        json!({
            "type": "object",
            "properties": {}
        })
    });

    struct MockTool {
        name: String,
        description: String,
    }

    impl MockTool {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                description: format!("Mock tool: {}", name),
            })
        }
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            &self.description
        }

        fn schema(&self) -> &Value {
            &MOCK_SCHEMA
        }

        async fn execute(&self, _input: Value, _ctx: &mut ToolContext<'_>) -> Result<Value> {
            Ok(json!({"result": "mock"}))
        }
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = ToolRegistry::new();
        registry.register(MockTool::new("send_email")).await;

        assert_eq!(registry.resolve("send_email").await.unwrap().name(), "send_email");
        assert!(registry.get("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn test_unresolved_tool_is_validation_error() {
        let registry = ToolRegistry::new();
        registry.register(MockTool::new("a")).await;

        let err = registry
            .resolve_all(&["a".to_string(), "b".to_string()])
            .await
            .err()
            .unwrap();
        assert!(err.is_validation());
        assert!(err.to_string().contains("'b'"));
    }

    #[tokio::test]
    async fn test_signatures_sorted() {
        let registry = ToolRegistry::new();
        registry.register(MockTool::new("tool2")).await;
        registry.register(MockTool::new("tool1")).await;

        let names: Vec<String> = registry
            .signatures()
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["tool1", "tool2"]);
    }
}

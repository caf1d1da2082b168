// SPDX-License-Identifier: MIT

//! Pipeline loader - YAML file loading, parsing and structural checks

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use super::types::{NodeDef, PipelineDefinition};
use crate::adk::error::{AdkError, Result, ValidationError};
use crate::outreach::human_tool;

pub struct PipelineLoader;

impl PipelineLoader {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<PipelineDefinition> {
        let content = fs::read_to_string(path)?;
        Self::parse_yaml(&content)
    }

    /// Parse a definition; an unknown node kind or malformed node is a
    /// validation error
    pub fn parse_yaml(content: &str) -> Result<PipelineDefinition> {
        let def: PipelineDefinition = serde_yaml::from_str(content)
            .map_err(|e| invalid(e.to_string()))?;
        Self::check(&def)?;
        Ok(def)
    }

    /// Structural checks that serde cannot express
    pub fn check(def: &PipelineDefinition) -> Result<()> {
        let mut names = HashSet::new();
        check_node(&def.root, &mut names)?;

        let mut tool_names = HashSet::new();
        for tool in &def.tools {
            if !tool_names.insert(tool.name.as_str()) {
                return Err(invalid(format!("tool '{}' declared twice", tool.name)));
            }
            if tool.state_key.is_some() && !tool.effectful {
                log::warn!("Tool '{}' has a state_key but is not effectful", tool.name);
            }
        }
        Ok(())
    }

    /// Tools referenced by nodes but neither declared nor built in
    pub fn undeclared_tools(def: &PipelineDefinition) -> Vec<String> {
        let mut known: HashSet<&str> = def.tools.iter().map(|t| t.name.as_str()).collect();
        if def.human.is_some() {
            known.insert(human_tool::TOOL_NAME);
        }
        let mut used = Vec::new();
        collect_tools(&def.root, &mut used);
        let mut missing: Vec<String> = used
            .into_iter()
            .filter(|t| !known.contains(t.as_str()))
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

fn collect_tools(node: &NodeDef, out: &mut Vec<String>) {
    match node {
        NodeDef::Llm(n) => out.extend(n.tools.iter().cloned()),
        NodeDef::Tool(n) => out.push(n.tool.clone()),
        _ => {}
    }
    for child in node.children() {
        collect_tools(child, out);
    }
}

fn check_node<'a>(node: &'a NodeDef, names: &mut HashSet<&'a str>) -> Result<()> {
    if node.name().trim().is_empty() {
        return Err(invalid("node with an empty name"));
    }
    if !names.insert(node.name()) {
        return Err(invalid(format!("node name '{}' is not unique", node.name())));
    }
    match node {
        NodeDef::Sequential(c) | NodeDef::Parallel(c) if c.agents.is_empty() => {
            return Err(invalid(format!("composite '{}' has no children", c.name)));
        }
        NodeDef::Loop(l) if l.agents.is_empty() => {
            return Err(invalid(format!("loop '{}' has no children", l.name)));
        }
        _ => {}
    }
    for child in node.children() {
        check_node(child, names)?;
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> AdkError {
    AdkError::Validation(ValidationError::InvalidDefinition(message.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPELINE: &str = r#"
name: demo
description: "Demo pipeline"
label_key: business_data.id
state:
  business_data:
    type: object
  call_category:
    type: any
tools:
  - name: phone_call
    url: http://127.0.0.1:9/call
    effectful: true
    state_key: call_invocation
    input_schema:
      type: object
      required: [phone]
root:
  kind: sequential
  name: outreach
  agents:
    - kind: tool
      name: caller
      tool: phone_call
      args:
        phone: "{business_data.phone}"
      output_key: call_result
    - kind: llm
      name: classifier
      instruction: "Classify {call_result}"
      output_key: call_category
      outputs:
        agreed: call_category.agreed_to_email
    - kind: router
      name: route
      key: agreed
      on_true:
        kind: loop
        name: refine
        max_iterations: 3
        on_exhausted: fail
        agents:
          - kind: llm
            name: drafter
            instruction: "Draft"
      on_false:
        kind: llm
        name: clerk
        instruction: "Persist"
"#;

    #[test]
    fn test_parse_nested_pipeline() {
        let def = PipelineLoader::parse_yaml(PIPELINE).unwrap();
        assert_eq!(def.name, "demo");
        assert_eq!(def.tools[0].record_key(), "call_invocation");
        assert!(def.tools[0].effectful);

        let NodeDef::Sequential(root) = &def.root else {
            panic!("root should be sequential");
        };
        assert_eq!(root.agents.len(), 3);
        let NodeDef::Llm(classifier) = &root.agents[1] else {
            panic!("expected llm node");
        };
        assert_eq!(classifier.output.output_key.as_deref(), Some("call_category"));
        assert_eq!(classifier.output.outputs["agreed"], "call_category.agreed_to_email");

        let NodeDef::Router(router) = &root.agents[2] else {
            panic!("expected router");
        };
        let NodeDef::Loop(refine) = router.on_true.as_ref() else {
            panic!("expected loop");
        };
        assert_eq!(refine.max_iterations, 3);
        assert_eq!(refine.gate.key, "quality_status");
    }

    #[test]
    fn test_undeclared_tools() {
        let def = PipelineLoader::parse_yaml(PIPELINE).unwrap();
        assert!(PipelineLoader::undeclared_tools(&def).is_empty());

        let yaml = r#"
name: p
root:
  kind: llm
  name: a
  instruction: x
  tools: [request_human_input, save_lead]
"#;
        let def = PipelineLoader::parse_yaml(yaml).unwrap();
        assert_eq!(
            PipelineLoader::undeclared_tools(&def),
            vec!["request_human_input", "save_lead"]
        );
    }

    #[test]
    fn test_shipped_sdr_pipeline_is_valid() {
        let def = PipelineLoader::parse_yaml(include_str!("../../../pipelines/sdr.yaml")).unwrap();
        assert_eq!(def.label_key.as_deref(), Some("business_data.id"));
        assert!(PipelineLoader::undeclared_tools(&def).is_empty());
        assert_eq!(def.tools.iter().filter(|t| t.effectful).count(), 2);
        let human = def.human.as_ref().unwrap();
        assert_eq!(human.outcome_key.as_deref(), Some("website_ready"));
    }

    #[test]
    fn test_shipped_lead_finder_pipeline_is_valid() {
        let yaml = include_str!("../../../pipelines/lead_finder.yaml");
        let def = PipelineLoader::parse_yaml(yaml).unwrap();
        assert!(PipelineLoader::undeclared_tools(&def).is_empty());
        assert_eq!(def.dispatch.as_ref().unwrap().entity_key, "final_merged_leads");

        let NodeDef::Sequential(root) = &def.root else {
            panic!("lead finder root should be sequential");
        };
        let NodeDef::Parallel(search) = &root.agents[0] else {
            panic!("searches should run in parallel");
        };
        assert_eq!(search.agents.len(), 2);
    }

    #[test]
    fn test_shipped_lead_manager_pipeline_is_valid() {
        let yaml = include_str!("../../../pipelines/lead_manager.yaml");
        let def = PipelineLoader::parse_yaml(yaml).unwrap();
        assert!(PipelineLoader::undeclared_tools(&def).is_empty());
        assert!(def.human.is_none());
        assert_eq!(def.tools.iter().filter(|t| t.effectful).count(), 2);
    }

    #[test]
    fn test_unknown_kind_is_validation_error() {
        let yaml = r#"
name: bad
root:
  kind: teleport
  name: x
"#;
        let err = PipelineLoader::parse_yaml(yaml).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_duplicate_node_names_rejected() {
        let yaml = r#"
name: dup
root:
  kind: sequential
  name: root
  agents:
    - kind: llm
      name: a
      instruction: x
    - kind: llm
      name: a
      instruction: y
"#;
        let err = PipelineLoader::parse_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("not unique"));
    }

    #[test]
    fn test_empty_composite_rejected() {
        let yaml = r#"
name: empty
root:
  kind: parallel
  name: root
  agents: []
"#;
        assert!(PipelineLoader::parse_yaml(yaml).unwrap_err().is_validation());
    }
}

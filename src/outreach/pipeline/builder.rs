// SPDX-License-Identifier: MIT

//! Pipeline builder - turns a definition into an executable task tree
//!
//! Capabilities are resolved against the registry while building, so a
//! pipeline naming an unknown tool fails here rather than mid-run.

use serde_json::json;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use super::loader::PipelineLoader;
use super::types::{NodeDef, OutputDef, PipelineDefinition};
use crate::adk::agent::{
    Agent, ConditionalRouter, LlmTask, LoopAgent, OutputMapping, ParallelAgent, SequentialAgent,
    StatusGate, ToolTask,
};
use crate::adk::error::{AdkError, Result};
use crate::adk::model::{GenerationConfig, Model};
use crate::adk::tool::{HookedExecutor, ToolExecutor};
use crate::outreach::broker::HumanInteractionBroker;
use crate::outreach::dispatcher::{ArtifactStore, NotificationSink, SideEffectDispatcher};
use crate::outreach::guard::{GuardedTool, IdempotencyGuard};
use crate::outreach::hooks::CheckDef;
use crate::outreach::human_tool::RequestHumanInputTool;
use crate::outreach::registry::ToolRegistry;
use crate::outreach::tools::WebhookTool;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A built pipeline and the per-pipeline services its runs share
pub struct Pipeline {
    pub definition: PipelineDefinition,
    pub root: Arc<dyn Agent>,
    pub guard: Arc<IdempotencyGuard>,
    /// Argument checks, then the guard
    pub executor: Arc<dyn ToolExecutor>,
    pub dispatcher: Option<Arc<SideEffectDispatcher>>,
}

pub struct PipelineBuilder {
    registry: ToolRegistry,
    model: Option<Arc<dyn Model>>,
    generation: Option<GenerationConfig>,
    broker: Option<Arc<HumanInteractionBroker>>,
    sink: Option<Arc<dyn NotificationSink>>,
    artifacts: Option<Arc<dyn ArtifactStore>>,
}

impl PipelineBuilder {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            model: None,
            generation: None,
            broker: None,
            sink: None,
            artifacts: None,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn Model>, config: Option<GenerationConfig>) -> Self {
        self.model = Some(model);
        self.generation = config;
        self
    }

    pub fn with_broker(mut self, broker: Arc<HumanInteractionBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_dispatch(
        mut self,
        sink: Arc<dyn NotificationSink>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        self.sink = Some(sink);
        self.artifacts = Some(artifacts);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub async fn build_file(&self, path: &str) -> Result<Pipeline> {
        let def = PipelineLoader::load(path)?;
        self.build(def).await
    }

    pub async fn build(&self, def: PipelineDefinition) -> Result<Pipeline> {
        PipelineLoader::check(&def)?;
        self.register_tools(&def).await?;

        let guard = Arc::new(IdempotencyGuard::new(
            def.tools
                .iter()
                .filter(|t| t.effectful)
                .map(|t| GuardedTool {
                    name: t.name.clone(),
                    state_key: t.record_key(),
                }),
        ));
        let executor: Arc<dyn ToolExecutor> = if def.checks.is_empty() {
            guard.clone()
        } else {
            let hooks = def.checks.iter().cloned().map(CheckDef::into_hook).collect();
            Arc::new(HookedExecutor::new(hooks, guard.clone()))
        };

        let dispatcher = match (&def.dispatch, &self.sink, &self.artifacts) {
            (Some(config), Some(sink), Some(artifacts)) => Some(Arc::new(SideEffectDispatcher::new(
                config.clone(),
                sink.clone(),
                artifacts.clone(),
            ))),
            (Some(_), _, _) => {
                log::warn!(
                    "Pipeline {} declares dispatch but no sink is configured",
                    def.name
                );
                None
            }
            _ => None,
        };

        let root: Arc<dyn Agent> = match (&def.root, &dispatcher) {
            (NodeDef::Sequential(c), Some(hook)) => Arc::new(
                SequentialAgent::new(
                    c.name.clone(),
                    c.description.clone(),
                    self.build_children(&c.agents).await?,
                )
                .with_after_hook(hook.clone()),
            ),
            (node, Some(hook)) => {
                let inner = self.build_node(node).await?;
                Arc::new(
                    SequentialAgent::new(def.name.clone(), def.description.clone(), vec![inner])
                        .with_after_hook(hook.clone()),
                )
            }
            (node, None) => self.build_node(node).await?,
        };

        log::info!(
            "Built pipeline '{}' ({} tools, {} guarded)",
            def.name,
            def.tools.len(),
            def.tools.iter().filter(|t| t.effectful).count()
        );

        Ok(Pipeline {
            definition: def,
            root,
            guard,
            executor,
            dispatcher,
        })
    }

    async fn register_tools(&self, def: &PipelineDefinition) -> Result<()> {
        for tool_def in &def.tools {
            let timeout = tool_def
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_TOOL_TIMEOUT);
            let mut tool = WebhookTool::new(
                tool_def.name.clone(),
                tool_def.description.clone(),
                tool_def.url.clone(),
                tool_def.input_schema.clone(),
                timeout,
            )?;
            if let Some(schema) = &tool_def.output_schema {
                tool = tool.with_output_schema(schema.clone());
            }
            log::info!("Registered tool: {}", tool_def.name);
            self.registry.register(Arc::new(tool)).await;
        }

        if let Some(human) = &def.human {
            let broker = self.broker.clone().ok_or_else(|| {
                AdkError::config(format!(
                    "pipeline {} needs human input but no broker is configured",
                    def.name
                ))
            })?;
            let mut tool = RequestHumanInputTool::new(broker, human.result_key.clone());
            if let Some(key) = &human.clear_key {
                tool = tool.with_clear_key(key.clone());
            }
            if let Some(key) = &human.outcome_key {
                tool = tool.with_outcome_key(key.clone());
            }
            self.registry.register(Arc::new(tool)).await;
        }
        Ok(())
    }

    async fn build_children(&self, nodes: &[NodeDef]) -> Result<Vec<Arc<dyn Agent>>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            out.push(self.build_node(node).await?);
        }
        Ok(out)
    }

    #[allow(clippy::type_complexity)]
    fn build_node<'a>(
        &'a self,
        node: &'a NodeDef,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Agent>>> + Send + 'a>> {
        Box::pin(async move {
            let agent: Arc<dyn Agent> = match node {
                NodeDef::Llm(n) => {
                    let model = self.model.clone().ok_or_else(|| {
                        AdkError::config(format!("llm node '{}' needs a model", n.name))
                    })?;
                    let tools = self.registry.resolve_all(&n.tools).await?;
                    let mut task = LlmTask::new(
                        n.name.clone(),
                        n.description.clone(),
                        n.instruction.clone(),
                        model,
                        tools,
                    )
                    .with_output(output_mapping(&n.output));
                    if let Some(config) = &self.generation {
                        task = task.with_config(config.clone());
                    }
                    if let Some(turns) = n.max_turns {
                        task.max_turns = turns;
                    }
                    Arc::new(task)
                }
                NodeDef::Tool(n) => {
                    let tool = self.registry.resolve(&n.tool).await?;
                    let args = if n.args.is_null() {
                        json!({})
                    } else {
                        n.args.clone()
                    };
                    Arc::new(
                        ToolTask::new(n.name.clone(), tool, args)
                            .with_output(output_mapping(&n.output)),
                    )
                }
                NodeDef::Sequential(c) => Arc::new(SequentialAgent::new(
                    c.name.clone(),
                    c.description.clone(),
                    self.build_children(&c.agents).await?,
                )),
                NodeDef::Parallel(c) => Arc::new(ParallelAgent::new(
                    c.name.clone(),
                    c.description.clone(),
                    self.build_children(&c.agents).await?,
                )),
                NodeDef::Loop(l) => Arc::new(
                    LoopAgent::new(
                        l.name.clone(),
                        l.description.clone(),
                        self.build_children(&l.agents).await?,
                        Arc::new(StatusGate::new(l.gate.key.clone(), l.gate.pass.clone())),
                        l.max_iterations,
                    )
                    .with_exhaustion_policy(l.on_exhausted),
                ),
                NodeDef::Router(r) => Arc::new(ConditionalRouter::new(
                    r.name.clone(),
                    r.key.clone(),
                    self.build_node(&r.on_true).await?,
                    self.build_node(&r.on_false).await?,
                )),
            };
            Ok(agent)
        })
    }
}

fn output_mapping(def: &OutputDef) -> OutputMapping {
    OutputMapping {
        output_key: def.output_key.clone(),
        outputs: def
            .outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    }
}

// SPDX-License-Identifier: MIT

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::sync::Arc;

use outreach_rs::adk::model::gemini::GeminiModel;
use outreach_rs::outreach::broker::HumanInteractionBroker;
use outreach_rs::outreach::config::OutreachConfig;
use outreach_rs::outreach::dispatcher::{FileArtifactStore, HttpNotificationSink};
use outreach_rs::outreach::notify::HttpOperatorChannel;
use outreach_rs::outreach::pipeline::{PipelineBuilder, PipelineLoader};
use outreach_rs::outreach::registry::ToolRegistry;
use outreach_rs::outreach::runner::Runner;
use outreach_rs::outreach::server;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Optional YAML config file; environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the HTTP API for a pipeline
    Serve {
        #[arg(short, long)]
        pipeline: String,

        #[arg(long)]
        port: Option<u16>,
    },
    /// Run a pipeline once and print the report
    Run {
        #[arg(short, long)]
        pipeline: String,

        /// JSON file holding the initial session state
        #[arg(short, long)]
        input: PathBuf,

        /// Session label (defaults to the pipeline's label key)
        #[arg(short, long)]
        label: Option<String>,
    },
    /// Check a pipeline definition without running it
    Validate {
        #[arg(short, long)]
        pipeline: String,
    },
}

async fn build_runner(config: &OutreachConfig, pipeline: &str) -> anyhow::Result<Runner> {
    let channel = HttpOperatorChannel::new(&config.human_input_url, config.sink_timeout())?;
    let broker = Arc::new(HumanInteractionBroker::new(
        Arc::new(channel),
        config.human.clone(),
    ));
    let sink = HttpNotificationSink::new(&config.ui_client_url, config.sink_timeout())?;
    let model = GeminiModel::new(config.model.clone())?;

    let builder = PipelineBuilder::new(ToolRegistry::new())
        .with_model(Arc::new(model), Some(config.generation_config()))
        .with_broker(broker.clone())
        .with_dispatch(
            Arc::new(sink),
            Arc::new(FileArtifactStore::new(config.artifact_dir.clone())),
        );
    let pipeline = builder
        .build_file(pipeline)
        .await
        .with_context(|| format!("building pipeline {}", pipeline))?;

    Ok(Runner::new(Arc::new(pipeline), broker)
        .with_conflict_policy(config.conflict_policy)
        .with_retention(config.run_retention()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = OutreachConfig::load(args.config.as_deref())?;

    match args.command {
        Commands::Serve { pipeline, port } => {
            let runner = build_runner(&config, &pipeline).await?;
            server::serve(runner, port.unwrap_or(config.port)).await?;
        }
        Commands::Run {
            pipeline,
            input,
            label,
        } => {
            let runner = build_runner(&config, &pipeline).await?;
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let input: serde_json::Value = serde_json::from_str(&raw)?;

            let report = runner.run(input, label).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Validate { pipeline } => {
            let def = PipelineLoader::load(&pipeline)?;
            let undeclared = PipelineLoader::undeclared_tools(&def);
            if !undeclared.is_empty() {
                anyhow::bail!("pipeline {} uses undeclared tools: {:?}", def.name, undeclared);
            }
            println!("Pipeline {} is valid", def.name);
        }
    }

    Ok(())
}

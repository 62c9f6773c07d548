// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Deserialize;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use murmur_bus::Bus;
use murmur_config::Config;
use murmur_core::{Coordinator, LoggingEmitter, Task};
use murmur_persona::{PersonaAgent, TaskExecutorBehavior};
use murmur_tools::ToolManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = murmur_config::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Tools => show_tools(&config).await,
        Commands::Run { plan, json } => run_plan(&config, plan, *json).await,
    }
}

/// MURMUR_LOG takes precedence; -v flags set the default level otherwise.
fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("MURMUR_LOG")
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn build_tool_manager(config: &Config) -> anyhow::Result<Arc<ToolManager>> {
    let mut manager = ToolManager::new((&config.tools).into());
    if config.tools.builtin_natives {
        manager = manager.with_builtin_natives();
    }
    let manager = Arc::new(manager);
    if config.tools.builtin_natives {
        manager
            .load_builtin_natives()
            .await
            .context("loading built-in native tools")?;
    }
    let loaded = manager.load_from_config(&config.tools).await;
    tracing::info!(
        builtin = config.tools.builtin_natives,
        configured = loaded,
        "tool manager ready"
    );
    Ok(manager)
}

async fn show_tools(config: &Config) -> anyhow::Result<()> {
    let manager = build_tool_manager(config).await?;
    manager.check_all_health().await;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "registry": manager.registry_info(),
            "health": manager.health_report(),
        }))?
    );
    Ok(())
}

// ── Plan files ────────────────────────────────────────────────────────────────

/// A plan file is either a bare task list or a `{title, tasks}` mapping.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanInput {
    List(Vec<Task>),
    File {
        #[serde(default)]
        title: Option<String>,
        tasks: Vec<Task>,
    },
}

impl PlanInput {
    fn into_parts(self) -> (Option<String>, Vec<Task>) {
        match self {
            PlanInput::List(tasks) => (None, tasks),
            PlanInput::File { title, tasks } => (title, tasks),
        }
    }
}

async fn run_plan(config: &Config, plan_path: &Path, json: bool) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(plan_path)
        .with_context(|| format!("reading {}", plan_path.display()))?;
    let plan: PlanInput = serde_yaml::from_str(&text)
        .with_context(|| format!("parsing {}", plan_path.display()))?;
    let (title, tasks) = plan.into_parts();
    if tasks.is_empty() {
        anyhow::bail!("plan contains no tasks");
    }

    let model = murmur_model::from_config(&config.model)?;
    let manager = build_tool_manager(config).await?;

    let bus = Bus::new();
    bus.start();

    // Personas declared in config all run the task-executor behavior; the
    // coordinator can route individual tasks to them by capability.
    let mut personas = Vec::new();
    for persona_config in &config.personas {
        let persona = PersonaAgent::spawn(
            persona_config.clone(),
            Arc::new(TaskExecutorBehavior::new(manager.clone())),
            bus.clone(),
        )?;
        personas.push(persona);
    }

    let mut coordinator = Coordinator::new(manager, model)
        .with_bus(bus.clone())
        .with_events(Arc::new(LoggingEmitter))
        .with_config(config.coordinator.clone());

    if let Some(title) = &title {
        tracing::info!(%title, "running plan");
    }
    let completed = coordinator.run_tasks_with_llm_feedback(tasks).await;

    for persona in &personas {
        persona.shutdown().await;
    }
    bus.wait_idle().await;
    bus.stop();

    let failed = completed.iter().filter(|c| c.status() != "success").count();

    if json {
        let summary = serde_json::json!({
            "title": title,
            "completed": completed.iter().map(|c| serde_json::json!({
                "id": c.task.id,
                "name": c.task.name,
                "status": c.outcome.status,
                "summary": c.outcome.evaluation.summary,
                "output": coordinator.context().get_str(&format!("task_{}_output", c.task.id)),
            })).collect::<Vec<_>>(),
            "failed": failed,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for c in &completed {
            let output = coordinator
                .context()
                .get_str(&format!("task_{}_output", c.task.id))
                .unwrap_or_default();
            println!(
                "[{}] {} ({}): {}",
                c.outcome.status, c.task.name, c.task.id, output
            );
        }
        println!("{} task(s) completed, {} failed", completed.len(), failed);
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Full-stack integration tests: bus, personas, tool manager and the
//! coordinator wired together the way the binary wires them.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use murmur_bus::Bus;
use murmur_config::PersonaConfig;
use murmur_core::{Coordinator, Task};
use murmur_model::{MockProvider, ScriptedProvider};
use murmur_persona::{PersonaAgent, TaskExecutorBehavior};
use murmur_tools::{ToolManager, ToolManagerSettings};

async fn tool_manager() -> Arc<ToolManager> {
    let manager = ToolManager::new(ToolManagerSettings::default()).with_builtin_natives();
    manager.load_builtin_natives().await.unwrap();
    Arc::new(manager)
}

fn executor_config(id: &str) -> PersonaConfig {
    PersonaConfig {
        persona_id: id.into(),
        name: format!("Executor {id}"),
        description: String::new(),
        capabilities: vec!["task_execution".into()],
        priority: 5,
        max_concurrent_tasks: 2,
        shutdown_token: None,
    }
}

#[tokio::test]
async fn coordinator_routes_a_task_to_a_persona_and_merges_context() {
    let bus = Bus::new();
    let tools = tool_manager().await;
    let _persona = PersonaAgent::spawn(
        executor_config("executor"),
        Arc::new(TaskExecutorBehavior::new(tools.clone())),
        bus.clone(),
    )
    .unwrap();
    bus.start();

    let model = Arc::new(ScriptedProvider::always("{}"));
    let mut coordinator = Coordinator::new(tools, model).with_bus(bus.clone());

    let task = Task::command("task-5", "Remote echo", "echo via-persona");
    let reply = coordinator
        .send_task_to_persona(&task, "executor")
        .await
        .unwrap();

    assert_eq!(reply["status"], "success");
    // The persona's context updates landed in the coordinator's scratchpad.
    assert_eq!(
        coordinator.context().get_str("task_task-5_output").as_deref(),
        Some("via-persona")
    );
    assert_eq!(
        coordinator.context().get("task_task-5_success"),
        Some(&json!(true))
    );
    bus.stop();
}

#[tokio::test]
async fn persona_selection_prefers_capability_matches() {
    let bus = Bus::new();
    let tools = tool_manager().await;

    let mut files_config = executor_config("file-worker");
    files_config.capabilities = vec!["task_execution".into(), "file_management".into()];
    let _files = PersonaAgent::spawn(
        files_config,
        Arc::new(TaskExecutorBehavior::new(tools.clone())),
        bus.clone(),
    )
    .unwrap();
    let _general = PersonaAgent::spawn(
        executor_config("generalist"),
        Arc::new(TaskExecutorBehavior::new(tools.clone())),
        bus.clone(),
    )
    .unwrap();

    let model = Arc::new(ScriptedProvider::always("{}"));
    let coordinator = Coordinator::new(tools, model).with_bus(bus.clone());

    let task = Task::command("t", "List files", "ls /tmp/file-list");
    assert_eq!(
        coordinator.select_persona_for_task(&task).as_deref(),
        Some("file-worker")
    );
}

#[tokio::test]
async fn plan_survives_a_model_that_never_returns_json() {
    // The mock provider echoes prose; evaluation and re-planning both fall
    // back to their conservative defaults and the plan still completes.
    let tools = tool_manager().await;
    let model = Arc::new(MockProvider);
    let mut coordinator = Coordinator::new(tools, model);

    let completed = coordinator
        .run_tasks_with_llm_feedback(vec![
            Task::command("a", "A", "echo one"),
            Task::command("b", "B", "echo <task_a_output> two").with_dependencies(&["a"]),
        ])
        .await;

    assert_eq!(completed.len(), 2);
    assert_eq!(completed[0].status(), "success");
    assert_eq!(
        coordinator.context().get_str("task_b_output").as_deref(),
        Some("one two")
    );
}

#[tokio::test]
async fn late_persona_reply_does_not_resurrect_the_coordinator_waiter() {
    let bus = Bus::new();
    let tools = tool_manager().await;

    // A persona whose single permit is taken by a slow task: the second
    // request is rejected fast, the first reply arrives after the
    // coordinator's deadline.
    let mut config = executor_config("slowpoke");
    config.max_concurrent_tasks = 1;
    let _persona = PersonaAgent::spawn(
        config,
        Arc::new(TaskExecutorBehavior::new(tools.clone())),
        bus.clone(),
    )
    .unwrap();
    bus.start();

    let slow_task = Task::command("slow", "Slow", "sleep 1; echo late");
    let content = json!({"task": slow_task, "context": {}});
    let err = bus
        .request_reply(
            "coordinator",
            "slowpoke",
            "task.request",
            content,
            Duration::from_millis(100),
        )
        .await;
    assert!(err.is_err(), "the slow task must outlive the deadline");

    // Give the persona time to finish and send the late reply; nothing
    // should panic and the bus keeps working.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    bus.wait_idle().await;

    let ping = bus
        .request_reply(
            "tester",
            "slowpoke",
            "ping",
            json!({}),
            Duration::from_secs(2),
        )
        .await
        .unwrap();
    assert_eq!(ping.message_type, "pong");
    bus.stop();
}

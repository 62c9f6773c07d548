// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end tool manager tests: circuit breaking against a real failing
//! executable, chained execution, and health reporting.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use murmur_tools::{
    Capability, ErrorCode, ExecResult, ExecutionContext, HealthStatus, NativeTool, ToolConfig,
    ToolExecutionRequest, ToolKind, ToolManager, ToolManagerSettings, ToolMetadata,
};

fn write_script(dir: &tempfile::TempDir, name: &str, body: &str) -> String {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(f, "#!/bin/sh").unwrap();
    writeln!(f, "{body}").unwrap();
    drop(f);
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path.display().to_string()
}

fn executable_tool(name: &str, path: &str) -> (ToolMetadata, ToolConfig) {
    (
        ToolMetadata {
            name: name.into(),
            version: "1.0.0".into(),
            kind: ToolKind::Executable,
            description: String::new(),
            capabilities: vec![Capability::new("run")],
        },
        ToolConfig {
            settings: json!({"executable_path": path}),
            resource_limits: Default::default(),
        },
    )
}

#[tokio::test]
async fn breaker_opens_after_threshold_and_recovers_after_cool_down() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("healthy");
    let counter = dir.path().join("invocations");
    // Fails until the marker file exists; counts every invocation.
    let script = write_script(
        &dir,
        "flaky.sh",
        &format!(
            "echo x >> {counter}\n[ -f {marker} ] && echo '{{\"ok\": true}}' && exit 0\necho nope >&2\nexit 1",
            counter = counter.display(),
            marker = marker.display(),
        ),
    );

    let settings = ToolManagerSettings {
        default_timeout: Duration::from_secs(5),
        failure_threshold: 5,
        cool_down: Duration::from_millis(200),
    };
    let manager = ToolManager::new(settings);
    let (metadata, config) = executable_tool("flaky", &script);
    manager.load(metadata, config).await.unwrap();

    let invocations = || {
        std::fs::read_to_string(&counter)
            .unwrap_or_default()
            .lines()
            .count()
    };

    // Five consecutive failures trip the breaker.
    for _ in 0..5 {
        let outcome = manager
            .execute(ToolExecutionRequest::new("flaky", "run", json!({})))
            .await;
        assert_eq!(outcome.result.error_code, Some(ErrorCode::ExecutionError));
    }
    assert_eq!(invocations(), 5);

    // The sixth call is rejected without touching the adapter.
    let outcome = manager
        .execute(ToolExecutionRequest::new("flaky", "run", json!({})))
        .await;
    assert_eq!(
        outcome.result.error_code,
        Some(ErrorCode::CircuitBreakerOpen)
    );
    assert_eq!(invocations(), 5, "rejected call must not run the tool");

    // After the cool-down a single probe is allowed; make it succeed.
    std::fs::write(&marker, "ok").unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    let outcome = manager
        .execute(ToolExecutionRequest::new("flaky", "run", json!({})))
        .await;
    assert!(outcome.result.success);
    assert_eq!(invocations(), 6);

    // Breaker is closed again.
    let outcome = manager
        .execute(ToolExecutionRequest::new("flaky", "run", json!({})))
        .await;
    assert!(outcome.result.success);
}

#[tokio::test]
async fn timeout_surfaces_and_ticks_the_breaker() {
    let dir = tempfile::tempdir().unwrap();
    let script = write_script(&dir, "slow.sh", "sleep 10");
    let settings = ToolManagerSettings {
        default_timeout: Duration::from_millis(100),
        failure_threshold: 2,
        cool_down: Duration::from_secs(60),
    };
    let manager = ToolManager::new(settings);
    let (metadata, config) = executable_tool("slow", &script);
    manager.load(metadata, config).await.unwrap();

    for _ in 0..2 {
        let outcome = manager
            .execute(ToolExecutionRequest::new("slow", "run", json!({})))
            .await;
        assert_eq!(outcome.result.error_code, Some(ErrorCode::Timeout));
    }
    let outcome = manager
        .execute(ToolExecutionRequest::new("slow", "run", json!({})))
        .await;
    assert_eq!(
        outcome.result.error_code,
        Some(ErrorCode::CircuitBreakerOpen)
    );
}

/// Native tool that reflects its execution context metadata back, so tests
/// can observe what chained execution injected.
struct ContextMirror;

#[async_trait]
impl NativeTool for ContextMirror {
    fn name(&self) -> &str {
        "context_mirror"
    }
    async fn execute(&self, _capability: &str, _input: &Value, ctx: &ExecutionContext) -> ExecResult {
        ExecResult::ok(Value::Object(ctx.metadata.clone()))
    }
    async fn health_check(&self) -> HealthStatus {
        HealthStatus::ok("context_mirror", "ok")
    }
}

fn mirror_tool(name: &str) -> (ToolMetadata, ToolConfig) {
    (
        ToolMetadata {
            name: name.into(),
            version: "1.0.0".into(),
            kind: ToolKind::Native,
            description: String::new(),
            capabilities: vec![Capability::new("reflect")],
        },
        ToolConfig {
            settings: json!({"entry_point": "context_mirror"}),
            resource_limits: Default::default(),
        },
    )
}

#[tokio::test]
async fn chain_injects_prior_results_into_context_metadata() {
    let mut manager = ToolManager::new(ToolManagerSettings::default()).with_builtin_natives();
    manager.register_native("context_mirror", || Arc::new(ContextMirror));
    let (metadata, config) = mirror_tool("mirror");
    manager.load(metadata, config).await.unwrap();
    manager.load_builtin_natives().await.unwrap();

    let outcomes = manager
        .execute_chain(vec![
            ToolExecutionRequest::new(
                "command_executor",
                "execute",
                json!({"command": "echo chained"}),
            ),
            ToolExecutionRequest::new("mirror", "reflect", json!({})),
        ])
        .await;

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.success);
    let mirrored = outcomes[1].result.data.as_ref().unwrap();
    assert_eq!(
        mirrored["command_executor_result"]["output"], "chained",
        "first step's data must be visible to the second step"
    );
}

#[tokio::test]
async fn chain_passes_failures_forward_without_halting() {
    let mut manager = ToolManager::new(ToolManagerSettings::default()).with_builtin_natives();
    manager.register_native("context_mirror", || Arc::new(ContextMirror));
    let (metadata, config) = mirror_tool("mirror");
    manager.load(metadata, config).await.unwrap();
    manager.load_builtin_natives().await.unwrap();

    let outcomes = manager
        .execute_chain(vec![
            ToolExecutionRequest::new(
                "command_executor",
                "execute",
                json!({"command": "echo bad >&2; exit 7"}),
            ),
            ToolExecutionRequest::new("mirror", "reflect", json!({})),
        ])
        .await;

    assert!(!outcomes[0].result.success);
    assert!(outcomes[1].result.success, "chain must not halt on failure");
    let mirrored = outcomes[1].result.data.as_ref().unwrap();
    assert_eq!(mirrored["command_executor_error"], "bad");
}

#[tokio::test]
async fn health_report_reflects_tool_health() {
    let dir = tempfile::tempdir().unwrap();
    let healthy = write_script(&dir, "ok.sh", r#"[ "$1" = "--health" ] && exit 0; echo '{}'"#);
    let manager = ToolManager::new(ToolManagerSettings::default());
    let (metadata, config) = executable_tool("probe", &healthy);
    manager.load(metadata, config).await.unwrap();

    let health = manager.check_health("probe").await;
    assert!(health.healthy);

    let report = manager.health_report();
    assert_eq!(report["system_status"], "healthy");
    assert_eq!(report["total_tools"], 1);
    assert_eq!(report["tools"]["probe"]["healthy"], true);

    let info = manager.registry_info();
    assert_eq!(info["tools"]["probe"]["kind"], "executable");
    assert_eq!(info["tools"]["probe"]["capabilities"][0], "run");
}

#[tokio::test]
async fn subprocess_rpc_tool_round_trips_through_manager() {
    let manager = ToolManager::new(ToolManagerSettings::default());
    let metadata = ToolMetadata {
        name: "rpc_echo".into(),
        version: "1.0.0".into(),
        kind: ToolKind::SubprocessRpc,
        description: String::new(),
        capabilities: vec![Capability::new("echo")],
    };
    let config = ToolConfig {
        settings: json!({
            "server_command": [
                "sh", "-c",
                r#"while read -r line; do printf '{"jsonrpc":"2.0","id":"x","result":{"from":"child"}}\n'; done"#
            ]
        }),
        resource_limits: Default::default(),
    };
    manager.load(metadata, config).await.unwrap();

    let outcome = manager
        .execute(ToolExecutionRequest::new("rpc_echo", "echo", json!({"hi": 1})))
        .await;
    assert!(outcome.result.success, "{:?}", outcome.result.error);
    assert_eq!(outcome.result.data.unwrap()["from"], "child");

    // Unload terminates the child.
    manager.unload("rpc_echo").await.unwrap();
}

#[tokio::test]
async fn memory_backend_receives_execution_logs() {
    use murmur_tools::{InMemoryStore, Memory};

    let store = Arc::new(InMemoryStore::new());
    let manager = ToolManager::new(ToolManagerSettings::default())
        .with_builtin_natives()
        .with_memory(store.clone() as Arc<dyn Memory>);
    manager.load_builtin_natives().await.unwrap();

    manager
        .execute(ToolExecutionRequest::new(
            "command_executor",
            "execute",
            json!({"command": "true"}),
        ))
        .await;

    let keys = store.keys();
    assert_eq!(keys.len(), 1);
    let log = store.load(&keys[0]).unwrap();
    assert_eq!(log["tool"], "command_executor");
    assert_eq!(log["success"], true);
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! In-process native tools.
//!
//! A native tool's config names an `entry_point`; the adapter resolves it
//! against the [`NativeToolFactory`] registered with the manager at startup.
//! This is the static-Rust rendition of module-path/class-name loading:
//! every loadable implementation is compiled in and keyed by name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::contracts::{ErrorCode, ExecResult, ExecutionContext, HealthStatus, ToolMetadata};

const OUTPUT_LIMIT: usize = 100_000;

/// Trait implemented by every in-process tool.
///
/// The capability is dispatched by the implementation itself, so one
/// implementor can serve several capabilities.  Errors are folded into
/// [`ExecResult::err`] — implementations never raise.
#[async_trait]
pub trait NativeTool: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, capability: &str, input: &Value, ctx: &ExecutionContext) -> ExecResult;

    async fn health_check(&self) -> HealthStatus {
        HealthStatus::ok(self.name(), "native tool loaded")
    }
}

type Builder = Arc<dyn Fn() -> Arc<dyn NativeTool> + Send + Sync>;

/// Registry of native tool constructors keyed by entry-point name.
#[derive(Default)]
pub struct NativeToolFactory {
    builders: HashMap<String, Builder>,
}

impl NativeToolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory pre-populated with the built-in natives.
    pub fn with_builtins() -> Self {
        let mut factory = Self::new();
        factory.register("command_executor", || Arc::new(CommandExecutorTool));
        factory.register("system_info", || Arc::new(SystemInfoTool));
        factory
    }

    pub fn register<F>(&mut self, entry_point: impl Into<String>, builder: F)
    where
        F: Fn() -> Arc<dyn NativeTool> + Send + Sync + 'static,
    {
        self.builders.insert(entry_point.into(), Arc::new(builder));
    }

    pub fn build(&self, entry_point: &str) -> Option<Arc<dyn NativeTool>> {
        self.builders.get(entry_point).map(|b| b())
    }

    pub fn contains(&self, entry_point: &str) -> bool {
        self.builders.contains_key(entry_point)
    }

    pub fn entry_points(&self) -> Vec<String> {
        let mut names: Vec<String> = self.builders.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Adapter binding a resolved native instance to its metadata.
pub struct NativeAdapter {
    metadata: Arc<ToolMetadata>,
    instance: Arc<dyn NativeTool>,
}

impl NativeAdapter {
    pub fn new(metadata: Arc<ToolMetadata>, instance: Arc<dyn NativeTool>) -> Self {
        Self { metadata, instance }
    }

    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    pub async fn execute(
        &self,
        capability: &str,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> ExecResult {
        self.instance
            .execute(capability, input, ctx)
            .await
            .with_metadata("tool_type", json!("native"))
            .with_metadata("capability", json!(capability))
    }

    pub async fn health_check(&self) -> HealthStatus {
        self.instance.health_check().await
    }
}

// ── Built-in: command_executor ────────────────────────────────────────────────

/// Runs a shell command with the execution deadline.  This is the tool the
/// coordinator targets for `type == "command"` tasks.
pub struct CommandExecutorTool;

#[async_trait]
impl NativeTool for CommandExecutorTool {
    fn name(&self) -> &str {
        "command_executor"
    }

    async fn execute(&self, capability: &str, input: &Value, ctx: &ExecutionContext) -> ExecResult {
        if capability != "execute" {
            return ExecResult::err(
                ErrorCode::CapabilityNotFound,
                format!("Capability '{capability}' not implemented"),
            );
        }
        let command = match input.get("command").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => {
                return ExecResult::err(ErrorCode::ExecutionError, "missing 'command' input")
            }
        };
        let workdir = input.get("workdir").and_then(|v| v.as_str());

        debug!(cmd = %command, "command_executor");

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&command).kill_on_drop(true);
        if let Some(wd) = workdir {
            cmd.current_dir(wd);
        }

        let result = tokio::time::timeout(ctx.timeout, cmd.output()).await;
        match result {
            Ok(Ok(output)) => {
                let stdout = truncate(&String::from_utf8_lossy(&output.stdout));
                let stderr = truncate(&String::from_utf8_lossy(&output.stderr));
                let code = output.status.code().unwrap_or(-1);
                let data = json!({
                    "output": stdout.trim_end(),
                    "stderr": stderr.trim_end(),
                    "exit_code": code,
                });
                if output.status.success() {
                    ExecResult::ok(data)
                } else {
                    let message = if stderr.trim().is_empty() {
                        format!("command exited with code {code}")
                    } else {
                        stderr.trim_end().to_string()
                    };
                    ExecResult::err(ErrorCode::ExecutionError, message).with_data(data)
                }
            }
            Ok(Err(e)) => ExecResult::err(ErrorCode::ExecutionError, format!("spawn error: {e}")),
            Err(_) => ExecResult::err(
                ErrorCode::Timeout,
                format!("command timed out after {:?}", ctx.timeout),
            ),
        }
    }
}

fn truncate(s: &str) -> String {
    if s.len() <= OUTPUT_LIMIT {
        s.to_string()
    } else {
        format!(
            "{}...[truncated {} bytes]",
            &s[..OUTPUT_LIMIT],
            s.len() - OUTPUT_LIMIT
        )
    }
}

// ── Built-in: system_info ─────────────────────────────────────────────────────

/// Reports basic host facts.
pub struct SystemInfoTool;

#[async_trait]
impl NativeTool for SystemInfoTool {
    fn name(&self) -> &str {
        "system_info"
    }

    async fn execute(
        &self,
        capability: &str,
        _input: &Value,
        _ctx: &ExecutionContext,
    ) -> ExecResult {
        if capability != "report" {
            return ExecResult::err(
                ErrorCode::CapabilityNotFound,
                format!("Capability '{capability}' not implemented"),
            );
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        ExecResult::ok(json!({
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "cpus": cpus,
            "cwd": cwd,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

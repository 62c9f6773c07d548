// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Short-lived executable tools: `exe <capability> <json_input>` per call.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::contracts::{ErrorCode, ExecResult, ExecutionContext, HealthStatus, ToolMetadata};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ExecutableAdapter {
    metadata: Arc<ToolMetadata>,
    executable_path: String,
}

impl ExecutableAdapter {
    pub fn new(metadata: Arc<ToolMetadata>, executable_path: String) -> Self {
        Self {
            metadata,
            executable_path,
        }
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
        let mut cmd = Command::new(&self.executable_path);
        cmd.arg(capability)
            .arg(input.to_string())
            .kill_on_drop(true);

        debug!(exe = %self.executable_path, capability, "executable tool");

        let result = tokio::time::timeout(ctx.timeout, cmd.output()).await;
        let output = match result {
            Err(_) => {
                return ExecResult::err(
                    ErrorCode::Timeout,
                    format!("executable timed out after {:?}", ctx.timeout),
                )
            }
            Ok(Err(e)) => {
                return ExecResult::err(
                    ErrorCode::ExecutionError,
                    format!("failed to run {}: {e}", self.executable_path),
                )
            }
            Ok(Ok(output)) => output,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if output.status.success() {
            // JSON stdout becomes the data verbatim; anything else is
            // wrapped so callers always get structured output.
            let data = serde_json::from_str::<Value>(stdout.trim())
                .unwrap_or_else(|_| json!({"output": stdout}));
            ExecResult::ok(data)
                .with_metadata("tool_type", json!("executable"))
                .with_metadata("capability", json!(capability))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
            let message = if stderr.is_empty() {
                "Executable failed".to_string()
            } else {
                stderr
            };
            ExecResult::err(ErrorCode::ExecutionError, message)
        }
    }

    /// `exe --health` exiting 0 within the deadline is healthy.
    pub async fn health_check(&self) -> HealthStatus {
        let mut cmd = Command::new(&self.executable_path);
        cmd.arg("--health").kill_on_drop(true);
        match tokio::time::timeout(HEALTH_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                HealthStatus::ok(self.metadata.name.clone(), "Executable accessible")
            }
            Ok(Ok(_)) => {
                HealthStatus::failing(self.metadata.name.clone(), "Executable not accessible")
            }
            Ok(Err(_)) => HealthStatus::failing(self.metadata.name.clone(), "Executable not found"),
            Err(_) => {
                HealthStatus::failing(self.metadata.name.clone(), "Executable health check timeout")
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Long-lived JSON-RPC 2.0 subprocess tools.
//!
//! One request per line over the child's stdin/stdout.  The child is started
//! lazily on the first call and terminated (grace, then kill) on unload.
//! Every request id equals the execution's trace id so child-side logs can
//! be correlated with the manager's.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::contracts::{ErrorCode, ExecResult, ExecutionContext, HealthStatus, ToolMetadata};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[allow(dead_code)]
    jsonrpc: Option<String>,
    #[allow(dead_code)]
    id: Option<Value>,
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: Option<i64>,
    message: String,
}

struct RpcProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

pub struct SubprocessRpcAdapter {
    metadata: Arc<ToolMetadata>,
    server_command: Vec<String>,
    /// The single stdio pipe serializes requests; the mutex also guards
    /// lazy startup.
    process: tokio::sync::Mutex<Option<RpcProcess>>,
}

impl SubprocessRpcAdapter {
    pub fn new(metadata: Arc<ToolMetadata>, server_command: Vec<String>) -> Self {
        Self {
            metadata,
            server_command,
            process: tokio::sync::Mutex::new(None),
        }
    }

    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn spawn(&self) -> std::io::Result<RpcProcess> {
        let mut cmd = Command::new(&self.server_command[0]);
        cmd.args(&self.server_command[1..])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let mut child = cmd.spawn()?;
        let stdin = child.stdin.take().expect("child stdin requested");
        let stdout = BufReader::new(child.stdout.take().expect("child stdout requested"));
        debug!(tool = %self.metadata.name, pid = child.id(), "RPC server started");
        Ok(RpcProcess {
            child,
            stdin,
            stdout,
        })
    }

    /// Make sure a live child sits in `slot`, starting or restarting as
    /// needed.
    fn ensure_started(&self, slot: &mut Option<RpcProcess>) -> Result<(), String> {
        let alive = match slot.as_mut() {
            Some(proc) => matches!(proc.child.try_wait(), Ok(None)),
            None => false,
        };
        if alive {
            return Ok(());
        }
        if slot.is_some() {
            warn!(tool = %self.metadata.name, "RPC server died, restarting");
        }
        match self.spawn() {
            Ok(proc) => {
                *slot = Some(proc);
                Ok(())
            }
            Err(e) => Err(format!("failed to start RPC server: {e}")),
        }
    }

    /// One JSON-RPC round trip with a read deadline.
    async fn call(&self, method: &str, params: Value, id: &str, timeout: Duration) -> ExecResult {
        let mut slot = self.process.lock().await;
        if let Err(e) = self.ensure_started(&mut slot) {
            return ExecResult::err(ErrorCode::ExecutionError, e);
        }
        let proc = slot.as_mut().expect("ensure_started filled the slot");

        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let mut line = request.to_string();
        line.push('\n');
        if let Err(e) = proc.stdin.write_all(line.as_bytes()).await {
            return ExecResult::err(ErrorCode::ExecutionError, format!("RPC write failed: {e}"));
        }
        if let Err(e) = proc.stdin.flush().await {
            return ExecResult::err(ErrorCode::ExecutionError, format!("RPC flush failed: {e}"));
        }

        let mut buf = String::new();
        match tokio::time::timeout(timeout, proc.stdout.read_line(&mut buf)).await {
            Err(_) => ExecResult::err(ErrorCode::Timeout, "RPC response timeout"),
            Ok(Err(e)) => {
                ExecResult::err(ErrorCode::ExecutionError, format!("RPC read failed: {e}"))
            }
            Ok(Ok(0)) => ExecResult::err(ErrorCode::NoResponse, "No response from RPC server"),
            Ok(Ok(_)) => match serde_json::from_str::<RpcResponse>(&buf) {
                Err(e) => ExecResult::err(
                    ErrorCode::McpError,
                    format!("malformed RPC response: {e}"),
                ),
                Ok(RpcResponse {
                    error: Some(err), ..
                }) => {
                    let mut result = ExecResult::err(ErrorCode::McpError, err.message);
                    if let Some(code) = err.code {
                        result = result.with_metadata("rpc_error_code", json!(code));
                    }
                    result
                }
                Ok(RpcResponse { result, .. }) => {
                    ExecResult::ok(result.unwrap_or(Value::Null))
                }
            },
        }
    }

    pub async fn execute(
        &self,
        capability: &str,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> ExecResult {
        self.call(
            &format!("tools/{capability}"),
            input.clone(),
            &ctx.trace_id,
            ctx.timeout,
        )
        .await
        .with_metadata("tool_type", json!("subprocess_rpc"))
        .with_metadata("capability", json!(capability))
        .with_metadata("server_command", json!(self.server_command.join(" ")))
    }

    /// Health is a `ping` round trip against the *running* server.  A server
    /// that has not been started yet is reported unhealthy without spawning
    /// it.
    pub async fn health_check(&self) -> HealthStatus {
        let (alive, pid) = {
            let mut slot = self.process.lock().await;
            match slot.as_mut() {
                None => {
                    return HealthStatus::failing(
                        self.metadata.name.clone(),
                        "RPC server not running",
                    )
                }
                Some(proc) => match proc.child.try_wait() {
                    Ok(Some(status)) => {
                        return HealthStatus::failing(
                            self.metadata.name.clone(),
                            format!("RPC server terminated ({status})"),
                        )
                    }
                    _ => (true, proc.child.id()),
                },
            }
        };
        debug_assert!(alive);

        let result = self
            .call("ping", json!({}), "health_ping", HEALTH_TIMEOUT)
            .await;
        if result.success || result.error_code == Some(ErrorCode::McpError) {
            // Any well-formed response within the deadline counts as healthy.
            let mut status = HealthStatus::ok(self.metadata.name.clone(), "RPC server healthy");
            if let Some(pid) = pid {
                status = status.with_detail("pid", json!(pid));
            }
            status
        } else {
            HealthStatus::failing(
                self.metadata.name.clone(),
                result
                    .error
                    .unwrap_or_else(|| "RPC health check failed".to_string()),
            )
        }
    }

    /// Terminate the child: polite signal first, kill after the grace
    /// period.
    pub async fn stop(&self) {
        let mut slot = self.process.lock().await;
        let Some(mut proc) = slot.take() else {
            return;
        };
        if matches!(proc.child.try_wait(), Ok(Some(_))) {
            return;
        }
        terminate_gracefully(&mut proc.child).await;
        debug!(tool = %self.metadata.name, "RPC server stopped");
    }
}

#[cfg(unix)]
async fn terminate_gracefully(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a child pid we own.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, child.wait())
            .await
            .is_ok()
        {
            return;
        }
        warn!("RPC server ignored SIGTERM, killing");
    }
    let _ = child.kill().await;
}

#[cfg(not(unix))]
async fn terminate_gracefully(child: &mut Child) {
    let _ = child.kill().await;
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use crate::contracts::{Capability, ToolKind};

    use super::*;

    fn adapter(server_command: Vec<&str>) -> SubprocessRpcAdapter {
        let metadata = Arc::new(ToolMetadata {
            name: "rpc_demo".into(),
            version: "1.0.0".into(),
            kind: ToolKind::SubprocessRpc,
            description: String::new(),
            capabilities: vec![Capability::new("echo")],
        });
        SubprocessRpcAdapter::new(
            metadata,
            server_command.into_iter().map(str::to_string).collect(),
        )
    }

    /// A shell one-liner that answers every request line with a JSON-RPC
    /// result echoing a constant.
    fn echo_server() -> Vec<&'static str> {
        vec![
            "sh",
            "-c",
            r#"while read -r line; do printf '{"jsonrpc":"2.0","id":"x","result":{"echo":true}}\n'; done"#,
        ]
    }

    #[tokio::test]
    async fn executes_against_line_delimited_server() {
        let adapter = adapter(echo_server());
        let ctx = ExecutionContext::new(Duration::from_secs(5));
        let out = adapter.execute("echo", &json!({"m": 1}), &ctx).await;
        assert!(out.success, "unexpected failure: {:?}", out.error);
        assert_eq!(out.data.unwrap()["echo"], true);
        adapter.stop().await;
    }

    #[tokio::test]
    async fn rpc_error_object_maps_to_mcp_error() {
        let adapter = adapter(vec![
            "sh",
            "-c",
            r#"while read -r line; do printf '{"jsonrpc":"2.0","id":"x","error":{"code":-32601,"message":"no such method"}}\n'; done"#,
        ]);
        let ctx = ExecutionContext::new(Duration::from_secs(5));
        let out = adapter.execute("echo", &json!({}), &ctx).await;
        assert!(!out.success);
        assert_eq!(out.error_code, Some(ErrorCode::McpError));
        assert_eq!(out.error.as_deref(), Some("no such method"));
        assert_eq!(out.metadata["rpc_error_code"], json!(-32601));
        adapter.stop().await;
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let adapter = adapter(vec!["sh", "-c", "while read -r line; do :; done"]);
        let ctx = ExecutionContext::new(Duration::from_millis(200));
        let out = adapter.execute("echo", &json!({}), &ctx).await;
        assert!(!out.success);
        assert_eq!(out.error_code, Some(ErrorCode::Timeout));
        adapter.stop().await;
    }

    #[tokio::test]
    async fn closed_stdout_is_no_response() {
        // Child consumes the request, then exits without answering: the
        // read returns EOF.
        let adapter = adapter(vec!["sh", "-c", "read -r line; exit 0"]);
        let ctx = ExecutionContext::new(Duration::from_secs(2));
        let out = adapter.execute("echo", &json!({}), &ctx).await;
        assert!(!out.success);
        assert_eq!(out.error_code, Some(ErrorCode::NoResponse));
        adapter.stop().await;
    }

    #[tokio::test]
    async fn health_is_unhealthy_before_first_start() {
        let adapter = adapter(echo_server());
        let health = adapter.health_check().await;
        assert!(!health.healthy);
        assert!(health.message.contains("not running"));
    }

    #[tokio::test]
    async fn health_pings_a_running_server() {
        let adapter = adapter(echo_server());
        let ctx = ExecutionContext::new(Duration::from_secs(5));
        let _ = adapter.execute("echo", &json!({}), &ctx).await;
        let health = adapter.health_check().await;
        assert!(health.healthy, "unexpected: {}", health.message);
        assert!(health.details.contains_key("pid"));
        adapter.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let adapter = adapter(echo_server());
        adapter.stop().await;
        adapter.stop().await;
    }
}

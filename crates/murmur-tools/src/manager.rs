// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use murmur_config::ToolsConfig;

use crate::adapters::{
    ExecutableAdapter, HttpAdapter, HttpAuth, NativeAdapter, SubprocessRpcAdapter, ToolInstance,
};
use crate::breaker::CircuitBreaker;
use crate::contracts::{
    definition_to_tool, Capability, ErrorCode, ExecResult, ExecutionContext, HealthStatus,
    ToolConfig, ToolKind, ToolMetadata, ToolState,
};
use crate::adapters::native::NativeToolFactory;
use crate::memory::Memory;
use crate::shortlist::{naive_shortlist, Shortlist};
use crate::ToolError;

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ToolManagerSettings {
    pub default_timeout: Duration,
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl Default for ToolManagerSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            failure_threshold: 5,
            cool_down: Duration::from_secs(60),
        }
    }
}

impl From<&ToolsConfig> for ToolManagerSettings {
    fn from(config: &ToolsConfig) -> Self {
        Self {
            default_timeout: Duration::from_secs(config.default_timeout_secs),
            failure_threshold: config.failure_threshold,
            cool_down: Duration::from_secs(config.cool_down_secs),
        }
    }
}

// ── Requests & outcomes ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ToolExecutionRequest {
    pub tool_name: String,
    pub capability: String,
    pub input: Value,
    /// Per-call deadline; the manager default applies when absent.
    pub timeout: Option<Duration>,
    /// Carried into the adapter's [`ExecutionContext`].  Chained execution
    /// injects prior step results here.
    pub metadata: Map<String, Value>,
}

impl ToolExecutionRequest {
    pub fn new(
        tool_name: impl Into<String>,
        capability: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            capability: capability.into(),
            input,
            timeout: None,
            metadata: Map::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ToolExecutionOutcome {
    pub tool_name: String,
    pub capability: String,
    pub result: ExecResult,
    pub duration: Duration,
}

// ── Metrics ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ToolMetrics {
    total: AtomicU64,
    successful: AtomicU64,
    failed: AtomicU64,
    /// Running average over successful executions, milliseconds.
    avg_ms: Mutex<f64>,
    last_execution: Mutex<Option<DateTime<Utc>>>,
}

impl ToolMetrics {
    fn record(&self, success: bool, duration: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        *self.last_execution.lock().expect("metrics lock poisoned") = Some(Utc::now());
        if success {
            let successful = self.successful.fetch_add(1, Ordering::Relaxed) + 1;
            let mut avg = self.avg_ms.lock().expect("metrics lock poisoned");
            let ms = duration.as_secs_f64() * 1000.0;
            *avg = (*avg * (successful - 1) as f64 + ms) / successful as f64;
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_executions: self.total.load(Ordering::Relaxed),
            successful_executions: self.successful.load(Ordering::Relaxed),
            failed_executions: self.failed.load(Ordering::Relaxed),
            avg_execution_time_ms: *self.avg_ms.lock().expect("metrics lock poisoned"),
            last_execution: *self.last_execution.lock().expect("metrics lock poisoned"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub avg_execution_time_ms: f64,
    pub last_execution: Option<DateTime<Utc>>,
}

// ── Manager ───────────────────────────────────────────────────────────────────

struct ToolEntry {
    metadata: ToolMetadata,
    config: ToolConfig,
    instance: ToolInstance,
    breaker: CircuitBreaker,
    metrics: ToolMetrics,
    state: Mutex<ToolState>,
    health: Mutex<Option<HealthStatus>>,
}

impl ToolEntry {
    fn set_state(&self, state: ToolState) {
        *self.state.lock().expect("state lock poisoned") = state;
    }

    fn state(&self) -> ToolState {
        *self.state.lock().expect("state lock poisoned")
    }
}

/// Loads, executes, health-checks and retires tools of four kinds through
/// one uniform contract.  The registry lock is only held around load/unload;
/// the execute path takes a read lock to clone the entry `Arc` and runs
/// lock-free from there (metric updates are atomic).
pub struct ToolManager {
    tools: RwLock<HashMap<String, Arc<ToolEntry>>>,
    factory: NativeToolFactory,
    settings: ToolManagerSettings,
    memory: Option<Arc<dyn Memory>>,
    shortlist: Option<Arc<dyn Shortlist>>,
}

impl ToolManager {
    pub fn new(settings: ToolManagerSettings) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            factory: NativeToolFactory::new(),
            settings,
            memory: None,
            shortlist: None,
        }
    }

    /// Replace the native factory with one pre-populated with the built-in
    /// tools.
    pub fn with_builtin_natives(mut self) -> Self {
        self.factory = NativeToolFactory::with_builtins();
        self
    }

    /// Attach an opaque memory backend; every execution is logged through it.
    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Attach an external tool shortlisting service (classifier, BM25, …).
    pub fn with_shortlist(mut self, shortlist: Arc<dyn Shortlist>) -> Self {
        self.shortlist = Some(shortlist);
        self
    }

    /// Register an additional native tool constructor.  Must happen before
    /// the manager is shared.
    pub fn register_native<F>(&mut self, entry_point: impl Into<String>, builder: F)
    where
        F: Fn() -> Arc<dyn crate::NativeTool> + Send + Sync + 'static,
    {
        self.factory.register(entry_point, builder);
    }

    fn tools_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ToolEntry>>> {
        self.tools.read().expect("tool registry lock poisoned")
    }

    fn tools_write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ToolEntry>>> {
        self.tools.write().expect("tool registry lock poisoned")
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Validate, instantiate and register a tool, then run an initial health
    /// probe.  Duplicate names are rejected.
    pub async fn load(&self, metadata: ToolMetadata, config: ToolConfig) -> Result<(), ToolError> {
        let errors = self.validate_config(&metadata, &config);
        if !errors.is_empty() {
            warn!(tool = %metadata.name, ?errors, "tool validation failed");
            return Err(ToolError::Validation(errors));
        }
        if self.tools_read().contains_key(&metadata.name) {
            return Err(ToolError::Duplicate(metadata.name));
        }

        let instance = self.instantiate(&metadata, &config)?;
        let entry = Arc::new(ToolEntry {
            metadata: metadata.clone(),
            config,
            instance,
            breaker: CircuitBreaker::new(self.settings.failure_threshold, self.settings.cool_down),
            metrics: ToolMetrics::default(),
            state: Mutex::new(ToolState::Loading),
            health: Mutex::new(None),
        });

        let health = entry.instance.health_check().await;
        *entry.health.lock().expect("health lock poisoned") = Some(health);
        entry.set_state(ToolState::Loaded);

        let mut tools = self.tools_write();
        if tools.contains_key(&metadata.name) {
            return Err(ToolError::Duplicate(metadata.name));
        }
        info!(tool = %metadata.name, kind = %metadata.kind, "tool loaded");
        tools.insert(metadata.name, entry);
        Ok(())
    }

    /// Remove a tool and release its resources.
    pub async fn unload(&self, name: &str) -> Result<(), ToolError> {
        let entry = self
            .tools_write()
            .remove(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        entry.set_state(ToolState::Stopping);
        entry.instance.stop().await;
        entry.set_state(ToolState::Unloaded);
        info!(tool = %name, "tool unloaded");
        Ok(())
    }

    /// Unload and load again with the persisted metadata and config.
    pub async fn reload(&self, name: &str) -> Result<(), ToolError> {
        let (metadata, config) = {
            let tools = self.tools_read();
            let entry = tools
                .get(name)
                .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
            (entry.metadata.clone(), entry.config.clone())
        };
        self.unload(name).await?;
        self.load(metadata, config).await
    }

    /// Load the built-in native tools under their canonical metadata.
    pub async fn load_builtin_natives(&self) -> Result<(), ToolError> {
        self.load(
            ToolMetadata {
                name: "command_executor".into(),
                version: "1.0.0".into(),
                kind: ToolKind::Native,
                description: "Run shell commands with a deadline".into(),
                capabilities: vec![Capability::new("execute").with_required(&["command"])],
            },
            ToolConfig {
                settings: json!({"entry_point": "command_executor"}),
                resource_limits: Default::default(),
            },
        )
        .await?;
        self.load(
            ToolMetadata {
                name: "system_info".into(),
                version: "1.0.0".into(),
                kind: ToolKind::Native,
                description: "Report basic host facts".into(),
                capabilities: vec![Capability::new("report")],
            },
            ToolConfig {
                settings: json!({"entry_point": "system_info"}),
                resource_limits: Default::default(),
            },
        )
        .await
    }

    /// Load every tool declared in config.  Individual failures are logged
    /// and skipped; returns the number of tools loaded.
    pub async fn load_from_config(&self, config: &ToolsConfig) -> usize {
        let mut loaded = 0;
        for definition in &config.definitions {
            let (metadata, tool_config) = match definition_to_tool(definition) {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(tool = %definition.name, error = %e, "skipping invalid tool definition");
                    continue;
                }
            };
            match self.load(metadata, tool_config).await {
                Ok(()) => loaded += 1,
                Err(e) => warn!(tool = %definition.name, error = %e, "failed to load tool"),
            }
        }
        loaded
    }

    fn validate_config(&self, metadata: &ToolMetadata, config: &ToolConfig) -> Vec<String> {
        let mut errors = Vec::new();
        if metadata.name.is_empty() {
            errors.push("Tool name is required".to_string());
        }
        if metadata.capabilities.is_empty() {
            errors.push("Tool must have at least one capability".to_string());
        }
        if let Some(secs) = config.resource_limits.max_execution_secs {
            if secs < 0 {
                errors.push("max_execution_secs must be non-negative".to_string());
            }
        }
        if let Some(mb) = config.resource_limits.max_memory_mb {
            if mb < 0 {
                errors.push("max_memory_mb must be non-negative".to_string());
            }
        }
        match metadata.kind {
            ToolKind::Native => {
                if settings_str(&config.settings, "entry_point").is_none() {
                    errors.push("Native tool requires settings.entry_point".to_string());
                }
            }
            ToolKind::SubprocessRpc => {
                let empty = config.settings["server_command"]
                    .as_array()
                    .map(|a| a.is_empty())
                    .unwrap_or(true);
                if empty {
                    errors.push(
                        "Subprocess RPC tool requires non-empty settings.server_command"
                            .to_string(),
                    );
                }
            }
            ToolKind::Executable => {
                if settings_str(&config.settings, "executable_path").is_none() {
                    errors.push("Executable tool requires settings.executable_path".to_string());
                }
            }
            ToolKind::Http => {
                if settings_str(&config.settings, "base_url").is_none() {
                    errors.push("HTTP tool requires settings.base_url".to_string());
                }
            }
        }
        errors
    }

    fn instantiate(
        &self,
        metadata: &ToolMetadata,
        config: &ToolConfig,
    ) -> Result<ToolInstance, ToolError> {
        let metadata = Arc::new(metadata.clone());
        match metadata.kind {
            ToolKind::Native => {
                let entry_point = settings_str(&config.settings, "entry_point")
                    .expect("validated")
                    .to_string();
                let instance = self
                    .factory
                    .build(&entry_point)
                    .ok_or(ToolError::UnknownEntryPoint(entry_point))?;
                Ok(ToolInstance::Native(NativeAdapter::new(metadata, instance)))
            }
            ToolKind::SubprocessRpc => {
                let command: Vec<String> = config.settings["server_command"]
                    .as_array()
                    .expect("validated")
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
                Ok(ToolInstance::SubprocessRpc(SubprocessRpcAdapter::new(
                    metadata, command,
                )))
            }
            ToolKind::Executable => {
                let path = settings_str(&config.settings, "executable_path")
                    .expect("validated")
                    .to_string();
                Ok(ToolInstance::Executable(ExecutableAdapter::new(
                    metadata, path,
                )))
            }
            ToolKind::Http => {
                let base_url = settings_str(&config.settings, "base_url")
                    .expect("validated")
                    .to_string();
                let auth: HttpAuth = config
                    .settings
                    .get("auth")
                    .cloned()
                    .map(|v| serde_json::from_value(v).unwrap_or_default())
                    .unwrap_or_default();
                Ok(ToolInstance::Http(HttpAdapter::new(metadata, base_url, auth)))
            }
        }
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    /// Execute with circuit-breaker protection and a hard deadline.  All
    /// failure modes come back as structured results; nothing is raised.
    pub async fn execute(&self, request: ToolExecutionRequest) -> ToolExecutionOutcome {
        let entry = self.tools_read().get(&request.tool_name).cloned();
        let Some(entry) = entry else {
            return ToolExecutionOutcome {
                tool_name: request.tool_name,
                capability: request.capability,
                result: ExecResult::err(ErrorCode::ToolNotFound, "Tool not found"),
                duration: Duration::ZERO,
            };
        };

        // Fail fast on input that cannot possibly succeed; validation
        // failures do not tick the breaker.
        if entry.metadata.capability(&request.capability).is_none() {
            return ToolExecutionOutcome {
                tool_name: request.tool_name,
                capability: request.capability.clone(),
                result: ExecResult::err(
                    ErrorCode::CapabilityNotFound,
                    format!("Capability '{}' not found", request.capability),
                ),
                duration: Duration::ZERO,
            };
        }
        let validation = entry
            .instance
            .validate_input(&request.capability, &request.input);
        if !validation.is_empty() {
            return ToolExecutionOutcome {
                tool_name: request.tool_name,
                capability: request.capability,
                result: ExecResult::err(
                    ErrorCode::ExecutionError,
                    format!("input validation failed: {}", validation.join("; ")),
                ),
                duration: Duration::ZERO,
            };
        }

        // Breaker gate: rejections return without touching the tool and
        // without ticking the breaker further.
        if !entry.breaker.try_acquire() {
            debug!(tool = %request.tool_name, "circuit breaker rejected execution");
            return ToolExecutionOutcome {
                tool_name: request.tool_name,
                capability: request.capability,
                result: ExecResult::err(
                    ErrorCode::CircuitBreakerOpen,
                    "Circuit breaker open - tool temporarily unavailable",
                ),
                duration: Duration::ZERO,
            };
        }

        let timeout = request.timeout.unwrap_or(self.settings.default_timeout);
        let ctx = ExecutionContext::new(timeout).with_metadata(request.metadata.clone());
        let trace_id = ctx.trace_id.clone();
        let started = Instant::now();

        let result = match tokio::time::timeout(
            timeout,
            entry.instance.execute(&request.capability, &request.input, &ctx),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => ExecResult::err(
                ErrorCode::Timeout,
                format!("Tool execution timeout after {timeout:?}"),
            ),
        };
        let duration = started.elapsed();

        entry.metrics.record(result.success, duration);
        if result.success {
            entry.breaker.on_success();
            entry.set_state(ToolState::Running);
        } else {
            entry.breaker.on_failure();
            if result.error_code == Some(ErrorCode::NoResponse) {
                // The backing process is gone; hold the tool in Failed until
                // reload or unload.
                entry.set_state(ToolState::Failed);
            }
        }

        if let Some(memory) = &self.memory {
            memory.store(
                &format!("tool_log:{trace_id}"),
                json!({
                    "tool": request.tool_name.as_str(),
                    "capability": request.capability.as_str(),
                    "success": result.success,
                    "duration_ms": duration.as_secs_f64() * 1000.0,
                    "error_code": result.error_code,
                }),
            );
        }

        ToolExecutionOutcome {
            tool_name: request.tool_name,
            capability: request.capability,
            result,
            duration,
        }
    }

    /// Run all requests concurrently; results come back in input order.
    pub async fn execute_parallel(
        &self,
        requests: Vec<ToolExecutionRequest>,
    ) -> Vec<ToolExecutionOutcome> {
        futures::future::join_all(requests.into_iter().map(|r| self.execute(r))).await
    }

    /// Run requests in order, threading each step's outcome into the next
    /// request's context metadata: `{tool}_result` on success,
    /// `{tool}_error` on failure.  A failed step does not halt the chain.
    pub async fn execute_chain(
        &self,
        requests: Vec<ToolExecutionRequest>,
    ) -> Vec<ToolExecutionOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        let mut chained: Map<String, Value> = Map::new();
        for mut request in requests {
            for (key, value) in &chained {
                request.metadata.insert(key.clone(), value.clone());
            }
            let tool_name = request.tool_name.clone();
            let outcome = self.execute(request).await;
            if outcome.result.success {
                if let Some(data) = &outcome.result.data {
                    chained.insert(format!("{tool_name}_result"), data.clone());
                }
            } else {
                chained.insert(
                    format!("{tool_name}_error"),
                    json!(outcome.result.error.clone().unwrap_or_default()),
                );
            }
            outcomes.push(outcome);
        }
        outcomes
    }

    // ── Introspection & health ────────────────────────────────────────────────

    pub fn list_tools(&self, kind: Option<ToolKind>) -> Vec<String> {
        let tools = self.tools_read();
        let mut names: Vec<String> = tools
            .iter()
            .filter(|(_, entry)| kind.map(|k| entry.metadata.kind == k).unwrap_or(true))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Tool ids matching a free-text query.  Delegates to the injected
    /// [`Shortlist`] service when present, otherwise falls back to a
    /// substring match over the loaded registry.
    pub fn shortlist_tools(&self, query: &str) -> Vec<String> {
        if let Some(service) = &self.shortlist {
            return service.shortlist(query);
        }
        let tools = self.tools_read();
        naive_shortlist(
            query,
            tools.values().map(|entry| {
                (
                    entry.metadata.name.clone(),
                    entry.metadata.description.clone(),
                    entry.metadata.capability_names(),
                )
            }),
        )
    }

    pub fn capabilities_of(&self, name: &str) -> Vec<String> {
        self.tools_read()
            .get(name)
            .map(|entry| entry.metadata.capability_names())
            .unwrap_or_default()
    }

    pub fn tool_state(&self, name: &str) -> Option<ToolState> {
        self.tools_read().get(name).map(|entry| entry.state())
    }

    pub fn metrics_of(&self, name: &str) -> Option<MetricsSnapshot> {
        self.tools_read()
            .get(name)
            .map(|entry| entry.metrics.snapshot())
    }

    /// Probe one tool and cache the status.
    pub async fn check_health(&self, name: &str) -> HealthStatus {
        let entry = self.tools_read().get(name).cloned();
        let Some(entry) = entry else {
            return HealthStatus::failing(name, "Tool not found");
        };
        let health = entry.instance.health_check().await;
        *entry.health.lock().expect("health lock poisoned") = Some(health.clone());
        health
    }

    /// Probe every loaded tool.
    pub async fn check_all_health(&self) -> HashMap<String, HealthStatus> {
        let names = self.list_tools(None);
        let mut results = HashMap::new();
        for name in names {
            let health = self.check_health(&name).await;
            results.insert(name, health);
        }
        results
    }

    /// Aggregate report: overall system status plus per-tool state, breaker
    /// and metrics, from the last cached health probes.
    pub fn health_report(&self) -> Value {
        let tools = self.tools_read();
        let total = tools.len();
        let healthy = tools
            .values()
            .filter(|e| {
                e.health
                    .lock()
                    .expect("health lock poisoned")
                    .as_ref()
                    .map(|h| h.healthy)
                    .unwrap_or(false)
            })
            .count();
        let failed = tools
            .values()
            .filter(|e| e.state() == ToolState::Failed)
            .count();
        let system_status = if total > 0 && healthy == total {
            "healthy"
        } else if healthy > 0 {
            "degraded"
        } else {
            "critical"
        };

        let mut per_tool = Map::new();
        for (name, entry) in tools.iter() {
            let health = entry.health.lock().expect("health lock poisoned").clone();
            per_tool.insert(
                name.clone(),
                json!({
                    "state": entry.state(),
                    "healthy": health.as_ref().map(|h| h.healthy).unwrap_or(false),
                    "health_message": health.map(|h| h.message),
                    "circuit_breaker": {
                        "state": entry.breaker.state(),
                        "consecutive_failures": entry.breaker.consecutive_failures(),
                    },
                    "metrics": entry.metrics.snapshot(),
                }),
            );
        }

        json!({
            "system_status": system_status,
            "total_tools": total,
            "healthy_tools": healthy,
            "failed_tools": failed,
            "tools": per_tool,
            "timestamp": Utc::now().to_rfc3339(),
        })
    }

    /// Registry summary: name, kind, version, state and capabilities per tool.
    pub fn registry_info(&self) -> Value {
        let tools = self.tools_read();
        let mut per_tool = Map::new();
        for (name, entry) in tools.iter() {
            per_tool.insert(
                name.clone(),
                json!({
                    "kind": entry.metadata.kind,
                    "version": entry.metadata.version,
                    "state": entry.state(),
                    "capabilities": entry.metadata.capability_names(),
                }),
            );
        }
        json!({
            "total_tools": tools.len(),
            "tools": per_tool,
        })
    }
}

fn settings_str<'a>(settings: &'a Value, key: &str) -> Option<&'a str> {
    settings.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

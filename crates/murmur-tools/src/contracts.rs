// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use murmur_config::ToolDefinition;

use crate::ToolError;

/// Integration mode of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Native,
    SubprocessRpc,
    Executable,
    Http,
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolKind::Native => "native",
            ToolKind::SubprocessRpc => "subprocess_rpc",
            ToolKind::Executable => "executable",
            ToolKind::Http => "http",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for ToolKind {
    type Err = ToolError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "native" => Ok(ToolKind::Native),
            "subprocess_rpc" => Ok(ToolKind::SubprocessRpc),
            "executable" => Ok(ToolKind::Executable),
            "http" => Ok(ToolKind::Http),
            other => Err(ToolError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

/// A named feature advertised by a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the capability's input.
    #[serde(default)]
    pub input_schema: Value,
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub risk_level: RiskLevel,
}

impl Capability {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            input_schema: Value::Null,
            required_fields: Vec::new(),
            risk_level: RiskLevel::Low,
        }
    }

    pub fn with_required(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|s| s.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,
    pub version: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub description: String,
    pub capabilities: Vec<Capability>,
}

impl ToolMetadata {
    pub fn capability(&self, name: &str) -> Option<&Capability> {
        self.capabilities.iter().find(|c| c.name == name)
    }

    pub fn capability_names(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.name.clone()).collect()
    }
}

/// Advisory resource limits; validated non-negative at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default)]
    pub max_execution_secs: Option<i64>,
    #[serde(default)]
    pub max_memory_mb: Option<i64>,
}

/// Kind-specific configuration.  `settings` carries the per-kind fields:
/// `entry_point` (native), `server_command` (subprocess_rpc),
/// `executable_path` (executable), `base_url` / `auth` (http).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub resource_limits: ResourceLimits,
}

/// Per-execution context handed to adapters.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Unique id for this execution; doubles as the JSON-RPC request id.
    pub trace_id: String,
    /// Hard deadline the adapter must enforce.
    pub timeout: Duration,
    pub metadata: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            timeout,
            metadata: Map::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Wire-level error taxonomy carried by every failed tool result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Timeout,
    ToolNotFound,
    CapabilityNotFound,
    ExecutionError,
    NoResponse,
    CircuitBreakerOpen,
    McpError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorCode::CapabilityNotFound => "CAPABILITY_NOT_FOUND",
            ErrorCode::ExecutionError => "EXECUTION_ERROR",
            ErrorCode::NoResponse => "NO_RESPONSE",
            ErrorCode::CircuitBreakerOpen => "CIRCUIT_BREAKER_OPEN",
            ErrorCode::McpError => "MCP_ERROR",
        };
        f.write_str(s)
    }
}

/// The result of one adapter execution.  Adapters never raise: every failure
/// mode is folded into `success == false` plus an error code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl ExecResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            error_code: None,
            metadata: Map::new(),
        }
    }

    pub fn err(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            error_code: Some(code),
            metadata: Map::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub component: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl HealthStatus {
    pub fn ok(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            healthy: true,
            component: component.into(),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn failing(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            healthy: false,
            component: component.into(),
            message: message.into(),
            details: Map::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}

/// Tool lifecycle.  `Failed` tools are held until `reload` or `unload`; they
/// are never removed automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Unloaded,
    Loading,
    Loaded,
    Running,
    Stopping,
    Failed,
}

/// Validate `input` against the declared capability: the capability must
/// exist and every required field must be present.
pub fn validate_required_fields(
    metadata: &ToolMetadata,
    capability: &str,
    input: &Value,
) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(cap) = metadata.capability(capability) else {
        errors.push(format!("Capability '{capability}' not found"));
        return errors;
    };
    for field in &cap.required_fields {
        if input.get(field).is_none() {
            errors.push(format!("Required field '{field}' missing"));
        }
    }
    errors
}

/// Convert a declarative [`ToolDefinition`] from config into the manager's
/// metadata/config pair.
pub fn definition_to_tool(def: &ToolDefinition) -> Result<(ToolMetadata, ToolConfig), ToolError> {
    let kind: ToolKind = def.kind.parse()?;
    let capabilities = def
        .capabilities
        .iter()
        .map(|c| Capability {
            name: c.name.clone(),
            description: c.description.clone(),
            input_schema: c.input_schema.clone(),
            required_fields: c.required_fields.clone(),
            risk_level: match c.risk_level.as_deref() {
                Some("medium") => RiskLevel::Medium,
                Some("high") => RiskLevel::High,
                _ => RiskLevel::Low,
            },
        })
        .collect();
    let metadata = ToolMetadata {
        name: def.name.clone(),
        version: def.version.clone(),
        kind,
        description: def.description.clone(),
        capabilities,
    };
    let config = ToolConfig {
        settings: def.settings.clone(),
        resource_limits: ResourceLimits {
            max_execution_secs: def.resource_limits.max_execution_secs,
            max_memory_mb: def.resource_limits.max_memory_mb,
        },
    };
    Ok((metadata, config))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

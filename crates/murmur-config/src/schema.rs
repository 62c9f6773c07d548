// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless the user
/// explicitly opts out need a named function.
fn default_true() -> bool {
    true
}

fn default_reply_timeout_secs() -> u64 {
    60
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cool_down_secs() -> u64 {
    60
}

fn default_persona_reply_timeout_secs() -> u64 {
    120
}

fn default_max_concurrent_tasks() -> usize {
    3
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub personas: Vec<PersonaConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier.  Supported values: "openai" (any OpenAI-compatible
    /// endpoint via `base_url`) | "mock".
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies, LiteLLM, or Ollama.
    pub base_url: Option<String>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            name: "gpt-4o-mini".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            api_key: None,
            base_url: None,
            temperature: Some(0.2),
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Default deadline for request/reply exchanges over the bus (seconds).
    #[serde(default = "default_reply_timeout_secs")]
    pub reply_timeout_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            reply_timeout_secs: default_reply_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-execution deadline applied when a request does not carry its own.
    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Consecutive failures after which a tool's circuit breaker opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before allowing a probe (seconds).
    #[serde(default = "default_cool_down_secs")]
    pub cool_down_secs: u64,
    /// Register the built-in native tools (command_executor, system_info)
    /// at startup.
    #[serde(default = "default_true")]
    pub builtin_natives: bool,
    /// Tools to load at startup.
    #[serde(default)]
    pub definitions: Vec<ToolDefinition>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_tool_timeout_secs(),
            failure_threshold: default_failure_threshold(),
            cool_down_secs: default_cool_down_secs(),
            builtin_natives: true,
            definitions: Vec::new(),
        }
    }
}

/// Declarative tool definition as it appears in config and plan files.
///
/// `murmur-tools` converts this into its own metadata/config pair at load
/// time; keeping the schema here lets tool sets be described entirely in
/// YAML without depending on the tools crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default = "default_tool_version")]
    pub version: String,
    /// One of: "native" | "subprocess_rpc" | "executable" | "http".
    pub kind: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<CapabilityDefinition>,
    /// Kind-specific settings: `entry_point` (native), `server_command`
    /// (subprocess_rpc), `executable_path` (executable), `base_url` / `auth`
    /// (http).
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default)]
    pub resource_limits: ResourceLimitsConfig,
}

fn default_tool_version() -> String {
    "1.0.0".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the capability's input.
    #[serde(default)]
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub required_fields: Vec<String>,
    /// "low" | "medium" | "high"
    #[serde(default)]
    pub risk_level: Option<String>,
}

/// Advisory resource limits.  Values are validated as non-negative at tool
/// load time; enforcement beyond the execution deadline is left to the
/// adapters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceLimitsConfig {
    #[serde(default)]
    pub max_execution_secs: Option<i64>,
    #[serde(default)]
    pub max_memory_mb: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Deadline for a persona to answer a dispatched task (seconds).
    #[serde(default = "default_persona_reply_timeout_secs")]
    pub persona_reply_timeout_secs: u64,
    /// Ask the model to re-plan the remaining tasks after each step.
    #[serde(default = "default_true")]
    pub replan_after_each_step: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            persona_reply_timeout_secs: default_persona_reply_timeout_secs(),
            replan_after_each_step: true,
        }
    }
}

/// Startup declaration for a persona agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub persona_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// 1–10, clamped on use (10 is highest).
    #[serde(default = "default_persona_priority")]
    pub priority: u8,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Shared secret required by `shutdown` messages when set.
    #[serde(default)]
    pub shutdown_token: Option<String>,
}

fn default_persona_priority() -> u8 {
    5
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = Config::default();
        assert_eq!(c.bus.reply_timeout_secs, 60);
        assert_eq!(c.tools.default_timeout_secs, 30);
        assert_eq!(c.tools.failure_threshold, 5);
        assert_eq!(c.tools.cool_down_secs, 60);
        assert!(c.tools.builtin_natives);
        assert!(c.personas.is_empty());
    }

    #[test]
    fn tool_definition_parses_minimal_yaml() {
        let yaml = r#"
name: weather
kind: http
capabilities:
  - name: forecast
settings:
  base_url: http://localhost:9000
"#;
        let def: ToolDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.name, "weather");
        assert_eq!(def.kind, "http");
        assert_eq!(def.version, "1.0.0");
        assert_eq!(def.capabilities.len(), 1);
        assert_eq!(def.settings["base_url"], "http://localhost:9000");
    }

    #[test]
    fn resource_limits_default_to_none() {
        let def: ToolDefinition =
            serde_yaml::from_str("name: t\nkind: native\n").unwrap();
        assert!(def.resource_limits.max_execution_secs.is_none());
        assert!(def.resource_limits.max_memory_mb.is_none());
    }

    #[test]
    fn persona_config_defaults() {
        let p: PersonaConfig =
            serde_yaml::from_str("persona_id: p1\nname: Executor\n").unwrap();
        assert_eq!(p.priority, 5);
        assert_eq!(p.max_concurrent_tasks, 3);
        assert!(p.shutdown_token.is_none());
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let c = Config::default();
        let text = serde_yaml::to_string(&c).unwrap();
        let back: Config = serde_yaml::from_str(&text).unwrap();
        assert_eq!(back.model.provider, c.model.provider);
        assert_eq!(back.tools.failure_threshold, c.tools.failure_threshold);
    }
}

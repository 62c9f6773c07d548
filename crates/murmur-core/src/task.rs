// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One step of a plan.
///
/// Two dispatch shapes are supported: `type == "command"` with a `command`
/// string (routed to the `command_executor` tool), and `tool` + `action`
/// with `params`.  A dotted `tool` ("fs.read") is split into tool and
/// action at dispatch time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub description: String,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    pub params: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(rename = "type")]
    pub task_type: String,
}

impl Task {
    /// Shorthand for a shell-command task.
    pub fn command(id: impl Into<String>, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            command: Some(command.into()),
            task_type: "command".into(),
            ..Default::default()
        }
    }

    pub fn with_dependencies(mut self, dependencies: &[&str]) -> Self {
        self.dependencies = dependencies.iter().map(|s| s.to_string()).collect();
        self
    }

    /// True for both command shapes: `type == "command"` and the
    /// `command_executor` tool form.  Only these are eligible for
    /// alternative-command retries.
    pub fn is_command(&self) -> bool {
        self.task_type == "command" || self.tool.as_deref() == Some("command_executor")
    }

    /// The trailing integer of the id, used to mirror outputs under the
    /// index-style context key (`task-3` → 3, `step-12` → 12).
    pub fn trailing_index(&self) -> Option<u64> {
        self.id.rsplit('-').next()?.parse().ok()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

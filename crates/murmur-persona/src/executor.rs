// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The task-executor persona: accepts `task.request`, runs the embedded
//! task through the tool manager and replies with the result plus context
//! updates for the requester's scratchpad.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use murmur_bus::Message;
use murmur_config::PersonaConfig;
use murmur_core::Task;
use murmur_tools::{ToolExecutionRequest, ToolManager};

use crate::behavior::PersonaBehavior;

pub struct TaskExecutorBehavior {
    tools: Arc<ToolManager>,
}

impl TaskExecutorBehavior {
    pub fn new(tools: Arc<ToolManager>) -> Self {
        Self { tools }
    }

    fn build_request(task: &Task) -> Result<ToolExecutionRequest, String> {
        if task.task_type == "command" {
            if let Some(command) = &task.command {
                return Ok(ToolExecutionRequest::new(
                    "command_executor",
                    "execute",
                    json!({"command": command}),
                ));
            }
        }
        if let Some(tool) = task.tool.clone() {
            let (tool_name, action) = if let Some((t, a)) = tool.split_once('.') {
                (t.to_string(), a.to_string())
            } else if let Some(a) = task.action.clone() {
                (tool.clone(), a)
            } else {
                return Err("task has a tool but no action".to_string());
            };
            return Ok(ToolExecutionRequest::new(
                tool_name,
                action,
                Value::Object(task.params.clone()),
            ));
        }
        Err("task has neither command nor tool/action".to_string())
    }
}

#[async_trait]
impl PersonaBehavior for TaskExecutorBehavior {
    async fn on_task_request(&self, config: &PersonaConfig, message: &Message) -> Value {
        let Some(task_value) = message.content.get("task") else {
            return json!({"status": "error", "message": "missing 'task' in request"});
        };
        let task: Task = match serde_json::from_value(task_value.clone()) {
            Ok(task) => task,
            Err(e) => {
                return json!({"status": "error", "message": format!("malformed task: {e}")})
            }
        };
        debug!(persona = %config.persona_id, task = %task.id, "executing task");

        let request = match Self::build_request(&task) {
            Ok(request) => request,
            Err(message) => return json!({"status": "error", "message": message}),
        };
        let outcome = self.tools.execute(request).await;

        let output_text = match &outcome.result.data {
            Some(Value::Object(map)) => map
                .get("output")
                .or_else(|| map.get("message"))
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            Some(other) => other.to_string(),
            None => outcome.result.error.clone().unwrap_or_default(),
        };

        let mut context_updates = Map::new();
        context_updates.insert(
            format!("task_{}_output", task.id),
            Value::String(output_text),
        );
        context_updates.insert(
            format!("task_{}_success", task.id),
            json!(outcome.result.success),
        );
        if let Some(error) = &outcome.result.error {
            context_updates.insert(format!("task_{}_error", task.id), json!(error));
        }

        json!({
            "status": if outcome.result.success { "success" } else { "error" },
            "task_id": task.id,
            "result": outcome.result,
            "duration_ms": outcome.duration.as_secs_f64() * 1000.0,
            "context_updates": context_updates,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_task_routes_to_command_executor() {
        let task = Task::command("t1", "T", "echo hi");
        let request = TaskExecutorBehavior::build_request(&task).unwrap();
        assert_eq!(request.tool_name, "command_executor");
        assert_eq!(request.capability, "execute");
        assert_eq!(request.input["command"], "echo hi");
    }

    #[test]
    fn dotted_tool_splits() {
        let task = Task {
            id: "t".into(),
            tool: Some("fs.read".into()),
            ..Default::default()
        };
        let request = TaskExecutorBehavior::build_request(&task).unwrap();
        assert_eq!(request.tool_name, "fs");
        assert_eq!(request.capability, "read");
    }

    #[test]
    fn shapeless_task_is_rejected() {
        let task = Task {
            id: "t".into(),
            ..Default::default()
        };
        assert!(TaskExecutorBehavior::build_request(&task).is_err());
    }
}

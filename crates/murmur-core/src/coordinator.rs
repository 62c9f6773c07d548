// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use murmur_bus::Bus;
use murmur_config::CoordinatorConfig;
use murmur_model::{extract_json_block, GenerateRequest, ModelProvider};
use murmur_tools::{ExecResult, Memory, ToolExecutionRequest, ToolManager};

use crate::evaluator::{Evaluator, TaskEvaluation};
use crate::events::EventEmitter;
use crate::feedback::{apply_feedback, PlanFeedback};
use crate::{PlanContext, Task};

/// What happened when one task ran.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// "success" | "error"
    pub status: String,
    /// Raw tool result, when a tool was actually invoked.
    pub result: Option<ExecResult>,
    /// Failure explanation when no tool ran (invalid shape, missing tool).
    pub message: Option<String>,
    pub evaluation: TaskEvaluation,
}

impl TaskOutcome {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            result: None,
            message: Some(message.into()),
            evaluation: TaskEvaluation::default(),
        }
    }
}

/// A task that finished, paired with its outcome.  The task recorded here is
/// the one that actually ran — a successful alternative-command retry
/// replaces the original in history.
#[derive(Debug, Clone)]
pub struct CompletedTask {
    pub task: Task,
    pub outcome: TaskOutcome,
}

impl CompletedTask {
    pub fn status(&self) -> &str {
        &self.outcome.status
    }
}

const REPLAN_SYSTEM_PROMPT: &str = r#"You are an automation plan manager. Based on the completed
tasks, their results, and the remaining tasks, decide the best next steps:
1. judge whether the remaining tasks are still valid
2. update task parameters where needed
3. add new tasks where needed
4. remove tasks that are no longer needed

Respond in exactly this JSON shape:
{
  "continuePlan": true or false,
  "addTasks":    [ new tasks ],
  "modifyTasks": [ replacement tasks, matched by id ],
  "removeTasks": [ task ids to drop ],
  "reasoning":   "why"
}"#;

/// Runs a plan to completion while letting the model adapt it after every
/// step.  Strictly sequential per plan; parallelism lives inside the tool
/// manager.
pub struct Coordinator {
    tools: Arc<ToolManager>,
    model: Arc<dyn ModelProvider>,
    evaluator: Evaluator,
    bus: Option<Arc<Bus>>,
    events: Option<Arc<dyn EventEmitter>>,
    memory: Option<Arc<dyn Memory>>,
    config: CoordinatorConfig,
    context: PlanContext,
}

impl Coordinator {
    pub fn new(tools: Arc<ToolManager>, model: Arc<dyn ModelProvider>) -> Self {
        Self {
            tools,
            evaluator: Evaluator::new(model.clone()),
            model,
            bus: None,
            events: None,
            memory: None,
            config: CoordinatorConfig::default(),
            context: PlanContext::new(),
        }
    }

    pub fn with_bus(mut self, bus: Arc<Bus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventEmitter>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(&self) -> &PlanContext {
        &self.context
    }

    fn emit(&self, event: &str, data: Value) {
        if let Some(events) = &self.events {
            events.emit(event, data);
        }
    }

    // ── Main loop ─────────────────────────────────────────────────────────────

    /// Execute the plan, re-shaping the remaining tasks from model feedback
    /// after every completed step.
    pub async fn run_tasks_with_llm_feedback(&mut self, tasks: Vec<Task>) -> Vec<CompletedTask> {
        info!(count = tasks.len(), "starting plan execution with model feedback");
        let mut remaining = tasks;
        let mut completed: Vec<CompletedTask> = Vec::new();

        while !remaining.is_empty() {
            let Some(mut next) = select_next_executable(&remaining, &completed) else {
                warn!("no executable task found; dependency chain may be broken");
                break;
            };
            let original_id = next.id.clone();
            info!(task = %next.name, id = %next.id, "running task");

            let mut outcome = self.execute_task(&next).await;

            if outcome.evaluation.retry_recommended {
                if let Some(alternative) = outcome.evaluation.alternative_command.clone() {
                    info!(task = %original_id, command = %alternative, "trying alternative command");
                    let retry = make_retry_task(&next, &alternative);
                    let retry_outcome = self.execute_task(&retry).await;
                    if retry_outcome.evaluation.success {
                        info!(task = %retry.id, "retry succeeded, replacing original in history");
                        outcome = retry_outcome;
                        next = retry;
                    } else {
                        warn!(task = %retry.id, "retry failed, keeping original result");
                        self.context.set(
                            format!("task_{original_id}_retry_result"),
                            json!({"status": retry_outcome.status}),
                        );
                    }
                }
            }

            info!(task = %next.name, status = %outcome.status, "task completed");
            completed.push(CompletedTask { task: next, outcome });
            remaining.retain(|t| t.id != original_id);
            self.update_context_for_completed(&completed);

            if !remaining.is_empty() && self.config.replan_after_each_step {
                let feedback = self.ask_feedback(&completed, &remaining).await;
                let completed_ids: Vec<String> =
                    completed.iter().map(|c| c.task.id.clone()).collect();
                let before = remaining.len();
                remaining = apply_feedback(remaining, feedback, &completed_ids);
                if remaining.len() != before {
                    info!(
                        before,
                        after = remaining.len(),
                        "plan updated by re-planner"
                    );
                }
            }
        }

        info!(count = completed.len(), "plan finished");
        if let Some(memory) = &self.memory {
            memory.store(
                "plan:last_run",
                json!({
                    "completed": completed.len(),
                    "statuses": completed.iter().map(CompletedTask::status).collect::<Vec<_>>(),
                }),
            );
        }
        completed
    }

    // ── Single task execution ─────────────────────────────────────────────────

    /// Substitute placeholders, dispatch by task shape, save outputs to the
    /// context and evaluate the result.
    pub async fn execute_task(&mut self, task: &Task) -> TaskOutcome {
        self.emit(
            "task_started",
            json!({
                "task_id": task.id,
                "task_name": task.name,
                "task_type": task.task_type,
            }),
        );

        let processed = self.context.substitute_task(task);
        let exec = self.dispatch(&processed).await;

        let outcome = match exec {
            Ok(result) => {
                let status = if result.success { "success" } else { "error" };
                self.save_to_context(task, &result);
                let output_text = self
                    .context
                    .get_str(&format!("task_{}_output", task.id))
                    .unwrap_or_default();
                let evaluation = self.evaluator.evaluate(task, &output_text, &mut self.context).await;
                TaskOutcome {
                    status: status.into(),
                    result: Some(result),
                    message: None,
                    evaluation,
                }
            }
            Err(message) => {
                warn!(task = %task.id, %message, "task could not be dispatched");
                self.context
                    .set_str(format!("task_{}_output", task.id), message.clone());
                self.context
                    .set(format!("task_{}_success", task.id), json!(false));
                self.context
                    .set(format!("task_{}_error", task.id), json!(message.clone()));
                TaskOutcome::invalid(message)
            }
        };

        let event = if outcome.status == "success" {
            "task_completed"
        } else {
            "task_error"
        };
        self.emit(
            event,
            json!({
                "task_id": task.id,
                "status": outcome.status,
                "summary": outcome.evaluation.summary,
            }),
        );
        outcome
    }

    /// Route the processed task to a tool: `command` shape goes to
    /// `command_executor`, `tool`+`action` goes wherever it points (dotted
    /// tool names split into tool and action).
    async fn dispatch(&self, task: &Task) -> Result<ExecResult, String> {
        if task.task_type == "command" {
            if let Some(command) = &task.command {
                let request = ToolExecutionRequest::new(
                    "command_executor",
                    "execute",
                    json!({"command": command}),
                );
                return Ok(self.tools.execute(request).await.result);
            }
        }
        if let Some(tool) = task.tool.clone() {
            let (tool_name, action_name) = if let Some((t, a)) = tool.split_once('.') {
                (t.to_string(), a.to_string())
            } else if let Some(a) = task.action.clone() {
                (tool.clone(), a)
            } else {
                return Err("INVALID_TASK: tool without action".to_string());
            };
            let request = ToolExecutionRequest::new(
                tool_name,
                action_name,
                Value::Object(task.params.clone()),
            );
            return Ok(self.tools.execute(request).await.result);
        }
        Err("INVALID_TASK: missing command or tool/action".to_string())
    }

    /// Write the task's outputs into the context under the id key, the
    /// index-mirror key, and (for retries) the original id's key.
    fn save_to_context(&mut self, task: &Task, result: &ExecResult) {
        let output_text = match &result.data {
            Some(Value::Object(map)) => map
                .get("output")
                .or_else(|| map.get("message"))
                .map(value_to_string)
                .unwrap_or_else(|| Value::Object(map.clone()).to_string()),
            Some(other) => value_to_string(other),
            None => result.error.clone().unwrap_or_default(),
        };

        self.context
            .set_str(format!("task_{}_output", task.id), output_text.clone());
        self.context
            .set(format!("task_{}_success", task.id), json!(result.success));
        self.context.set(
            format!("task_{}_error", task.id),
            json!(result.error.clone()),
        );

        if let Some(index) = task.trailing_index() {
            self.context
                .set_str(format!("task-{index}_output"), output_text.clone());
        }
        if let Some(base) = task.id.strip_suffix("-retry") {
            self.context
                .set_str(format!("task_{base}_output"), output_text);
        }
        debug!(task = %task.id, "saved task output to context");
    }

    /// Refresh the derived output keys for everything completed so far.
    fn update_context_for_completed(&mut self, completed: &[CompletedTask]) {
        for item in completed {
            if let Some(result) = item.outcome.result.clone() {
                self.save_to_context(&item.task, &result);
            }
        }
    }

    // ── Re-planning ───────────────────────────────────────────────────────────

    async fn ask_feedback(
        &self,
        completed: &[CompletedTask],
        remaining: &[Task],
    ) -> PlanFeedback {
        let last = completed.last();
        let prompt_context = json!({
            "completedTasks": completed
                .iter()
                .map(|c| json!({
                    "task": c.task,
                    "status": c.outcome.status,
                    "result": {
                        "output": self.context.get_str(&format!("task_{}_output", c.task.id)),
                    },
                }))
                .collect::<Vec<_>>(),
            "lastTaskResult": last.map(|c| json!({
                "status": c.outcome.status,
                "summary": c.outcome.evaluation.summary,
            })),
            "remainingTasks": remaining,
        });

        debug!("asking model for plan feedback");
        let response = self
            .model
            .generate(
                GenerateRequest::new(prompt_context.to_string())
                    .with_system(REPLAN_SYSTEM_PROMPT)
                    .with_temperature(0.2),
            )
            .await;

        match response {
            Ok(text) => match serde_json::from_str(extract_json_block(&text)) {
                Ok(feedback) => feedback,
                Err(e) => {
                    warn!(error = %e, "re-planner response unparseable; plan unchanged");
                    PlanFeedback::unchanged("response could not be parsed")
                }
            },
            Err(e) => {
                warn!(error = %e, "re-planner call failed; plan unchanged");
                PlanFeedback::unchanged("feedback call failed")
            }
        }
    }

    // ── Persona dispatch ──────────────────────────────────────────────────────

    /// Send a task to a persona over the bus and wait for its reply.  The
    /// reply's `context_updates` are merged into the plan context.
    pub async fn send_task_to_persona(
        &mut self,
        task: &Task,
        persona_id: &str,
    ) -> anyhow::Result<Value> {
        let bus = self.bus.as_ref().context("coordinator has no bus attached")?;
        let content = json!({
            "task": task,
            "context": self.context.snapshot(),
        });
        let timeout = Duration::from_secs(self.config.persona_reply_timeout_secs);
        let reply = bus
            .request_reply("coordinator", persona_id, "task.request", content, timeout)
            .await
            .with_context(|| format!("dispatching task {} to persona {persona_id}", task.id))?;

        if let Some(Value::Object(updates)) = reply.content.get("context_updates") {
            self.context.merge(updates.clone());
        }
        Ok(reply.content)
    }

    /// Pick the registered persona whose capabilities best match the task.
    /// Capability needs are inferred from the command text; every candidate
    /// must at least advertise `task_execution`.
    pub fn select_persona_for_task(&self, task: &Task) -> Option<String> {
        let bus = self.bus.as_ref()?;
        let command_text = task
            .command
            .clone()
            .or_else(|| {
                task.params
                    .get("command")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default()
            .to_lowercase();

        let mut required = vec!["task_execution".to_string()];
        if command_text.contains("file") {
            required.push("file_management".to_string());
        }
        if command_text.contains("network") {
            required.push("network_management".to_string());
        }

        let candidates = bus.find_by_capabilities(&required, false);
        candidates
            .into_iter()
            .max_by_key(|id| {
                required
                    .iter()
                    .filter(|cap| bus.find_by_capability(cap).contains(id))
                    .count()
            })
    }
}

/// First remaining task whose dependencies are all completed; listing order
/// is the tiebreak.
fn select_next_executable(remaining: &[Task], completed: &[CompletedTask]) -> Option<Task> {
    let completed_ids: Vec<&str> = completed.iter().map(|c| c.task.id.as_str()).collect();
    remaining
        .iter()
        .find(|task| {
            task.dependencies
                .iter()
                .all(|dep| completed_ids.contains(&dep.as_str()))
        })
        .cloned()
}

/// Clone a task for the alternative-command retry: `-retry` id suffix and
/// the command swapped in under whichever shape the task uses.
fn make_retry_task(task: &Task, alternative: &str) -> Task {
    let mut retry = task.clone();
    retry.id = format!("{}-retry", task.id);
    retry.name = format!("{} (Retry)", task.name);
    if task.tool.as_deref() == Some("command_executor") {
        retry
            .params
            .insert("command".into(), json!(alternative));
    } else if task.task_type == "command" {
        retry.command = Some(alternative.to_string());
    }
    retry
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

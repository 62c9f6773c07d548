// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Model-driven evaluation of a single task's output.
//!
//! The model's verdict is untrusted input: it is parsed against a strict
//! shape and every parse failure degrades to a conservative default that
//! lets the plan continue without a retry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use murmur_model::{extract_json_block, GenerateRequest, ModelProvider};

use crate::{PlanContext, Task};

fn default_true() -> bool {
    true
}

/// The evaluation verdict, in the exact JSON shape the model is asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskEvaluation {
    #[serde(default = "default_true")]
    pub success: bool,
    pub error: Option<String>,
    pub summary: String,
    #[serde(default = "default_true")]
    pub should_continue: bool,
    pub recommendation: Option<String>,
    pub alternative_command: Option<String>,
    /// Derived, not part of the wire shape: set when a failed command task
    /// came back with a usable alternative command.
    #[serde(skip)]
    pub retry_recommended: bool,
}

impl Default for TaskEvaluation {
    fn default() -> Self {
        Self {
            success: true,
            error: None,
            summary: String::new(),
            should_continue: true,
            recommendation: None,
            alternative_command: None,
            retry_recommended: false,
        }
    }
}

impl TaskEvaluation {
    /// Conservative fallback when the model response cannot be parsed.
    pub fn unparseable() -> Self {
        Self {
            summary: "unparseable".into(),
            ..Default::default()
        }
    }
}

const SYSTEM_PROMPT: &str =
    "You evaluate the output of automation tasks. Respond with valid JSON only.";

pub struct Evaluator {
    model: Arc<dyn ModelProvider>,
}

impl Evaluator {
    pub fn new(model: Arc<dyn ModelProvider>) -> Self {
        Self { model }
    }

    /// Evaluate `output_text` for `task`, post-process the retry
    /// recommendation, and record the verdict in the context.
    pub async fn evaluate(
        &self,
        task: &Task,
        output_text: &str,
        context: &mut PlanContext,
    ) -> TaskEvaluation {
        let prompt = self.build_prompt(task, output_text);
        let mut evaluation = match self.model.generate(
            GenerateRequest::new(prompt)
                .with_system(SYSTEM_PROMPT)
                .with_temperature(0.2),
        )
        .await
        {
            Ok(response) => match serde_json::from_str(extract_json_block(&response)) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(task = %task.id, error = %e, "evaluation response unparseable");
                    TaskEvaluation::unparseable()
                }
            },
            Err(e) => {
                warn!(task = %task.id, error = %e, "evaluation call failed");
                TaskEvaluation {
                    summary: "evaluation unavailable".into(),
                    ..Default::default()
                }
            }
        };

        // A retry is only recommended for failed command tasks that came
        // back with a concrete alternative.
        let alternative = evaluation
            .alternative_command
            .clone()
            .filter(|alt| !alt.trim().is_empty());
        if task.is_command() && !evaluation.success {
            if let Some(alt) = alternative {
                context.set_str(format!("task_{}_alternative_command", task.id), alt);
                evaluation.retry_recommended = true;
            }
        }

        context.set(
            format!("task_{}_success", task.id),
            json!(evaluation.success),
        );
        context.set(
            format!("task_{}_error", task.id),
            json!(evaluation.error.clone()),
        );
        context.set_str(
            format!("task_{}_summary", task.id),
            evaluation.summary.clone(),
        );
        context.set(
            format!("task_{}_should_continue", task.id),
            json!(evaluation.should_continue),
        );
        evaluation
    }

    fn build_prompt(&self, task: &Task, output_text: &str) -> String {
        let command = task
            .command
            .clone()
            .or_else(|| {
                task.params
                    .get("command")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_default();
        format!(
            r#"Analyze the following task output and respond with a JSON evaluation.

TASK: {name}
DESCRIPTION: {description}
COMMAND: {command}
OUTPUT:
{output}

Return exactly this JSON shape:
{{
  "success": boolean,
  "error": string or null,
  "summary": string,
  "shouldContinue": boolean,
  "recommendation": string,
  "alternativeCommand": string or null
}}

Analyze failures carefully. For example:
- if 'python' is not found, suggest 'python3'
- if a file is missing, check the path
- if permission is denied, suggest the required permission change

For a failed command you MUST fill alternativeCommand; otherwise it may be null.
Return only valid JSON."#,
            name = task.name,
            description = if task.description.is_empty() {
                "(none)"
            } else {
                task.description.as_str()
            },
            command = command,
            output = output_text,
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

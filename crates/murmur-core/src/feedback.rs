// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The re-planner contract: after each step the model may reshape the
//! remaining plan.  Responses are untrusted; malformed feedback leaves the
//! plan unchanged, and feedback that would make the dependency graph cyclic
//! is rejected wholesale.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::Task;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlanFeedback {
    #[serde(default = "default_true")]
    pub continue_plan: bool,
    pub add_tasks: Vec<Task>,
    pub modify_tasks: Vec<Task>,
    pub remove_tasks: Vec<String>,
    pub reasoning: String,
}

impl Default for PlanFeedback {
    fn default() -> Self {
        Self {
            continue_plan: true,
            add_tasks: Vec::new(),
            modify_tasks: Vec::new(),
            remove_tasks: Vec::new(),
            reasoning: String::new(),
        }
    }
}

impl PlanFeedback {
    /// Non-actionable feedback: continue with the plan as it stands.
    pub fn unchanged(reason: impl Into<String>) -> Self {
        Self {
            reasoning: reason.into(),
            ..Default::default()
        }
    }
}

/// Apply feedback to the remaining plan.
///
/// - `continuePlan == false` empties the plan.
/// - Added tasks get a generated id when they carry none.
/// - Modified tasks replace the remaining task with the same id; the id
///   itself is always preserved.
/// - Removed ids are dropped.
/// - If the result contains a dependency cycle among the remaining tasks,
///   the whole feedback is rejected and the plan is returned unchanged.
pub fn apply_feedback(
    remaining: Vec<Task>,
    feedback: PlanFeedback,
    completed_ids: &[String],
) -> Vec<Task> {
    if !feedback.continue_plan {
        info!("re-planner asked to stop execution");
        return Vec::new();
    }

    let original = remaining.clone();
    let mut updated = remaining;

    if !feedback.add_tasks.is_empty() {
        info!(count = feedback.add_tasks.len(), "re-planner added tasks");
        for mut task in feedback.add_tasks {
            if task.id.is_empty() {
                let id = uuid::Uuid::new_v4().simple().to_string();
                task.id = format!("task-{}", &id[..8]);
            }
            updated.push(task);
        }
    }

    for replacement in &feedback.modify_tasks {
        if let Some(slot) = updated.iter_mut().find(|t| t.id == replacement.id) {
            let id = slot.id.clone();
            info!(task = %id, "re-planner modified task");
            *slot = replacement.clone();
            slot.id = id;
        }
    }

    if !feedback.remove_tasks.is_empty() {
        info!(ids = ?feedback.remove_tasks, "re-planner removed tasks");
        updated.retain(|t| !feedback.remove_tasks.contains(&t.id));
    }

    if has_cycle(&updated, completed_ids) {
        warn!("re-planner feedback would create a dependency cycle; keeping plan unchanged");
        return original;
    }

    updated
}

/// Detect a dependency cycle among `tasks`.  Dependencies on completed or
/// unknown ids cannot participate in a cycle and are ignored.
fn has_cycle(tasks: &[Task], completed_ids: &[String]) -> bool {
    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let completed: HashSet<&str> = completed_ids.iter().map(String::as_str).collect();

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        id: &'a str,
        by_id: &HashMap<&'a str, &'a Task>,
        completed: &HashSet<&str>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(id) {
            Some(Mark::Done) => return false,
            Some(Mark::Visiting) => return true,
            None => {}
        }
        marks.insert(id, Mark::Visiting);
        if let Some(task) = by_id.get(id) {
            for dep in &task.dependencies {
                if completed.contains(dep.as_str()) || !by_id.contains_key(dep.as_str()) {
                    continue;
                }
                // Recurse through the borrowed id held by the task map so
                // lifetimes line up.
                let dep_id = by_id
                    .get_key_value(dep.as_str())
                    .map(|(k, _)| *k)
                    .expect("checked membership");
                if visit(dep_id, by_id, completed, marks) {
                    return true;
                }
            }
        }
        marks.insert(id, Mark::Done);
        false
    }

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    for task in tasks {
        if visit(task.id.as_str(), &by_id, &completed, &mut marks) {
            return true;
        }
    }
    false
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

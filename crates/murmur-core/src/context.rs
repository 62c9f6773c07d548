// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The coordinator's shared scratchpad and the placeholder engine.
//!
//! Two literal placeholder formats are substituted into task parameters,
//! exactly as they appear in plans produced by the model:
//!
//! ```text
//! <task-N_output>    — index form, N is a decimal integer
//! <task_ID_output>   — id form, ID is a full task id
//! ```
//!
//! Substitution is a single regex pass per format: only keys present in the
//! context are replaced, unknown placeholders are left intact, and
//! replacement text is never re-scanned.  Applying substitution twice equals
//! applying it once as long as no substituted value introduces another
//! placeholder.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use crate::Task;

fn index_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<task-(\d+)_output>").expect("static regex"))
}

fn id_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<task_([^>]+)_output>").expect("static regex"))
}

/// String→value scratchpad threading outputs between tasks.
#[derive(Debug, Clone, Default)]
pub struct PlanContext {
    values: HashMap<String, Value>,
}

impl PlanContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn set_str(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), Value::String(value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// The value under `key`, rendered as a string the way placeholder
    /// substitution would render it.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.values.get(key).map(value_to_string)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn merge(&mut self, entries: Map<String, Value>) {
        for (key, value) in entries {
            self.values.insert(key, value);
        }
    }

    /// Copy of the whole context as a JSON object.
    pub fn snapshot(&self) -> Value {
        Value::Object(self.values.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// Replace both placeholder formats in `text` with context values.
    /// Unknown placeholders stay untouched.
    pub fn substitute(&self, text: &str) -> String {
        let pass_one = index_placeholder().replace_all(text, |caps: &regex::Captures| {
            let key = format!("task-{}_output", &caps[1]);
            match self.get_str(&key) {
                Some(value) => {
                    debug!(placeholder = %&caps[0], "substituted placeholder");
                    value
                }
                None => caps[0].to_string(),
            }
        });
        let pass_two = id_placeholder().replace_all(&pass_one, |caps: &regex::Captures| {
            let key = format!("task_{}_output", &caps[1]);
            match self.get_str(&key) {
                Some(value) => {
                    debug!(placeholder = %&caps[0], "substituted placeholder");
                    value
                }
                None => caps[0].to_string(),
            }
        });
        pass_two.into_owned()
    }

    /// Deep-copy `task` with placeholders substituted in every string found
    /// in `params`, including strings nested inside arrays and objects.
    pub fn substitute_task(&self, task: &Task) -> Task {
        let mut processed = task.clone();
        for value in processed.params.values_mut() {
            self.substitute_value(value);
        }
        if let Some(command) = &processed.command {
            processed.command = Some(self.substitute(command));
        }
        processed
    }

    fn substitute_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.substitute(s),
            Value::Array(items) => {
                for item in items {
                    self.substitute_value(item);
                }
            }
            Value::Object(map) => {
                for item in map.values_mut() {
                    self.substitute_value(item);
                }
            }
            _ => {}
        }
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn id_placeholder_is_replaced() {
        let mut ctx = PlanContext::new();
        ctx.set_str("task_build_output", "binary ready");
        assert_eq!(
            ctx.substitute("result: <task_build_output>"),
            "result: binary ready"
        );
    }

    #[test]
    fn index_placeholder_is_replaced() {
        let mut ctx = PlanContext::new();
        ctx.set_str("task-2_output", "42");
        assert_eq!(ctx.substitute("prev said <task-2_output>"), "prev said 42");
    }

    #[test]
    fn unknown_placeholder_is_left_intact() {
        let ctx = PlanContext::new();
        assert_eq!(
            ctx.substitute("keep <task_missing_output> as is"),
            "keep <task_missing_output> as is"
        );
    }

    #[test]
    fn multiple_placeholders_in_one_string() {
        let mut ctx = PlanContext::new();
        ctx.set_str("task_a_output", "A");
        ctx.set_str("task_b_output", "B");
        assert_eq!(
            ctx.substitute("<task_a_output> then <task_b_output>"),
            "A then B"
        );
    }

    #[test]
    fn non_string_values_are_stringified() {
        let mut ctx = PlanContext::new();
        ctx.set("task_n_output", json!(7));
        assert_eq!(ctx.substitute("<task_n_output>"), "7");
    }

    #[test]
    fn substitution_is_idempotent_at_fixed_point() {
        let mut ctx = PlanContext::new();
        ctx.set_str("task-1_output", "stable");
        ctx.set_str("task_x_output", "value");
        let input = "a <task-1_output> b <task_x_output> c <task_unknown_output>";
        let once = ctx.substitute(input);
        let twice = ctx.substitute(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn substituted_values_are_not_rescanned_within_a_pass() {
        let mut ctx = PlanContext::new();
        // The value looks like an index-form placeholder, but the index pass
        // has already moved on; only the later id-form pass sees the string
        // again, and that key is absent.
        ctx.set_str("task-1_output", "<task-1_output>");
        let out = ctx.substitute("<task-1_output>");
        assert_eq!(out, "<task-1_output>");
    }

    #[test]
    fn substitute_task_walks_nested_params() {
        let mut ctx = PlanContext::new();
        ctx.set_str("task_a_output", "inner");
        let mut task = Task::command("task-b", "demo", "echo <task_a_output>");
        task.params.insert(
            "nested".into(),
            json!({"list": ["<task_a_output>", 1], "plain": "keep"}),
        );
        let processed = ctx.substitute_task(&task);
        assert_eq!(processed.command.as_deref(), Some("echo inner"));
        assert_eq!(processed.params["nested"]["list"][0], "inner");
        assert_eq!(processed.params["nested"]["plain"], "keep");
        // The original task is untouched.
        assert_eq!(task.command.as_deref(), Some("echo <task_a_output>"));
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut ctx = PlanContext::new();
        ctx.set_str("k", "old");
        let mut updates = Map::new();
        updates.insert("k".into(), json!("new"));
        updates.insert("extra".into(), json!(1));
        ctx.merge(updates);
        assert_eq!(ctx.get_str("k").as_deref(), Some("new"));
        assert_eq!(ctx.get("extra"), Some(&json!(1)));
    }
}

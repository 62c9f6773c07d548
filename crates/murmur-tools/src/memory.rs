// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;

/// Opaque key/value store injected by the embedder.
///
/// The runtime itself persists nothing; the tool manager and coordinator
/// only write through this interface when one is provided (execution logs,
/// plan summaries).  Backends — graph stores, vector stores, plain files —
/// live entirely outside the core.
pub trait Memory: Send + Sync {
    fn store(&self, key: &str, value: Value);
    fn load(&self, key: &str) -> Option<Value>;
}

/// Trivial in-process [`Memory`] backend, mainly for tests and demos.
#[derive(Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }
}

impl Memory for InMemoryStore {
    fn store(&self, key: &str, value: Value) {
        self.entries.lock().unwrap().insert(key.to_string(), value);
    }

    fn load(&self, key: &str) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

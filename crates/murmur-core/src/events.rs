// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use serde_json::Value;
use tracing::info;

/// Opaque event sink injected by the embedder (WebSocket layer, UI, …).
///
/// The coordinator emits `task_started`, `task_completed` and `task_error`
/// through this; the core neither knows nor cares where they go.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: &str, data: Value);
}

/// Emitter that forwards events to the tracing log.  Used by the CLI when no
/// external surface is attached.
pub struct LoggingEmitter;

impl EventEmitter for LoggingEmitter {
    fn emit(&self, event: &str, data: Value) {
        info!(event, %data, "plan event");
    }
}

/// Emitter that records events for inspection in tests.
#[derive(Default)]
pub struct RecordingEmitter {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, event: &str, data: Value) {
        self.events
            .lock()
            .unwrap()
            .push((event.to_string(), data));
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

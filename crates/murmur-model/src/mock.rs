// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::{GenerateRequest, ModelProvider};

/// Deterministic mock provider for tests.  Echoes the prompt back.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn generate(&self, req: GenerateRequest) -> anyhow::Result<String> {
        Ok(format!("MOCK: {}", req.prompt))
    }
}

/// A pre-scripted mock provider.  Each call to `generate` pops the next
/// response from the front of the queue.  This lets tests specify exact
/// evaluator / re-planner responses without network access.
pub struct ScriptedProvider {
    responses: Mutex<VecDeque<String>>,
    /// The last [`GenerateRequest`] seen by this provider.
    /// Written on each `generate()` call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<GenerateRequest>>>,
}

impl ScriptedProvider {
    /// Build a provider from an ordered list of responses.
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: provider that always returns the same text, however many
    /// times it is called.
    pub fn always(text: impl Into<String>) -> AlwaysProvider {
        AlwaysProvider { text: text.into() }
    }

    /// Number of scripted responses not yet consumed.
    pub fn remaining(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock"
    }

    async fn generate(&self, req: GenerateRequest) -> anyhow::Result<String> {
        *self.last_request.lock().unwrap() = Some(req);
        match self.responses.lock().unwrap().pop_front() {
            Some(text) => Ok(text),
            None => anyhow::bail!("scripted provider exhausted"),
        }
    }
}

/// Provider that returns one fixed response forever.  See
/// [`ScriptedProvider::always`].
pub struct AlwaysProvider {
    text: String,
}

#[async_trait]
impl ModelProvider for AlwaysProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }
    fn model_name(&self) -> &str {
        "scripted-mock"
    }

    async fn generate(&self, _req: GenerateRequest) -> anyhow::Result<String> {
        Ok(self.text.clone())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

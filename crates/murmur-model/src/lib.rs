// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Model provider abstraction for the coordinator's evaluation and
//! re-planning calls.
//!
//! The coordinator only ever needs "prompt in, text out" — responses are
//! parsed as structured JSON by the caller, so no streaming or tool-call
//! surface is exposed here.  `from_config` builds the provider named in
//! [`murmur_config::ModelConfig`]; tests use the deterministic mocks.

mod json;
mod mock;
mod openai_compat;
mod provider;

pub use json::extract_json_block;
pub use mock::{AlwaysProvider, MockProvider, ScriptedProvider};
pub use openai_compat::OpenAiCompatProvider;
pub use provider::{GenerateRequest, ModelProvider};

use std::sync::Arc;

use murmur_config::ModelConfig;

/// Build the provider named by the config.
///
/// `"mock"` yields the echoing [`MockProvider`]; everything else is treated
/// as an OpenAI-compatible endpoint (the default provider id is `"openai"`).
pub fn from_config(config: &ModelConfig) -> anyhow::Result<Arc<dyn ModelProvider>> {
    match config.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider)),
        _ => Ok(Arc::new(OpenAiCompatProvider::from_config(config)?)),
    }
}

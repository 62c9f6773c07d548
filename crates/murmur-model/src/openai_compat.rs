// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Driver for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Local proxies (Ollama, vLLM, LiteLLM) and most hosted providers speak the
//! same wire format; everything is configured through
//! [`murmur_config::ModelConfig`] — base URL, model name, key resolution.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use murmur_config::ModelConfig;

use crate::{GenerateRequest, ModelProvider};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const REQUEST_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiCompatProvider {
    model: String,
    api_key: Option<String>,
    chat_url: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Build from config.  The API key is resolved once: explicit
    /// `api_key` wins, then the environment variable named by
    /// `api_key_env`.  A missing key is not an error here — local endpoints
    /// run unauthenticated — requests simply omit the header.
    pub fn from_config(config: &ModelConfig) -> anyhow::Result<Self> {
        let api_key = config.api_key.clone().or_else(|| {
            config
                .api_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|k| !k.is_empty())
        });
        let base = config
            .base_url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            model: config.name.clone(),
            api_key,
            chat_url: format!("{base}/chat/completions"),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            client,
        })
    }
}

#[async_trait]
impl ModelProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, req: GenerateRequest) -> anyhow::Result<String> {
        let mut messages: Vec<Value> = Vec::new();
        if let Some(system) = &req.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": req.prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
        });
        if let Some(t) = req.temperature.or(self.temperature) {
            body["temperature"] = json!(t);
        }
        if let Some(m) = req.max_tokens.or(self.max_tokens) {
            body["max_tokens"] = json!(m);
        }

        debug!(model = %self.model, url = %self.chat_url, "chat completion request");

        let mut request = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.context("sending completion request")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(400).collect();
            bail!("completion request failed with {status}: {snippet}");
        }

        let parsed: Value = response.json().await.context("parsing completion body")?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string);
        match content {
            Some(text) => Ok(text),
            None => bail!("completion response missing choices[0].message.content"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: Option<&str>) -> ModelConfig {
        ModelConfig {
            provider: "openai".into(),
            name: "gpt-4o-mini".into(),
            api_key_env: None,
            api_key: Some("test-key".into()),
            base_url: base_url.map(str::to_string),
            temperature: Some(0.2),
            max_tokens: None,
        }
    }

    #[test]
    fn chat_url_defaults_to_openai() {
        let p = OpenAiCompatProvider::from_config(&config(None)).unwrap();
        assert_eq!(p.chat_url, "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let p = OpenAiCompatProvider::from_config(&config(Some("http://localhost:11434/v1/")))
            .unwrap();
        assert_eq!(p.chat_url, "http://localhost:11434/v1/chat/completions");
    }

    #[test]
    fn explicit_api_key_wins() {
        let p = OpenAiCompatProvider::from_config(&config(None)).unwrap();
        assert_eq!(p.api_key.as_deref(), Some("test-key"));
    }

    #[test]
    fn missing_key_is_allowed_for_local_endpoints() {
        let mut c = config(Some("http://localhost:8080/v1"));
        c.api_key = None;
        let p = OpenAiCompatProvider::from_config(&c).unwrap();
        assert!(p.api_key.is_none());
    }
}

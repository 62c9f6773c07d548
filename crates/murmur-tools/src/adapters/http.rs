// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! HTTP API tools: `POST {base}/{capability}` with a JSON body.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::contracts::{ErrorCode, ExecResult, ExecutionContext, HealthStatus, ToolMetadata};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const ERROR_SNIPPET_CHARS: usize = 400;

/// Auth settings from the tool's `settings.auth` block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpAuth {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub headers: std::collections::HashMap<String, String>,
}

pub struct HttpAdapter {
    metadata: Arc<ToolMetadata>,
    base_url: String,
    auth: HttpAuth,
    client: reqwest::Client,
}

impl HttpAdapter {
    pub fn new(metadata: Arc<ToolMetadata>, base_url: String, auth: HttpAuth) -> Self {
        Self {
            metadata,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            // Deadlines are per request; the client itself has none.
            client: reqwest::Client::new(),
        }
    }

    pub fn metadata(&self) -> &ToolMetadata {
        &self.metadata
    }

    fn apply_auth(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.auth.token {
            request = request.bearer_auth(token);
        }
        for (name, value) in &self.auth.headers {
            request = request.header(name, value);
        }
        request
    }

    pub async fn execute(
        &self,
        capability: &str,
        input: &Value,
        ctx: &ExecutionContext,
    ) -> ExecResult {
        let url = format!("{}/{capability}", self.base_url);
        debug!(%url, "http tool request");

        let request = self
            .apply_auth(self.client.post(&url))
            .timeout(ctx.timeout)
            .json(input);

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return ExecResult::err(
                    ErrorCode::Timeout,
                    format!("request to {url} timed out after {:?}", ctx.timeout),
                )
            }
            Err(e) => {
                return ExecResult::err(ErrorCode::ExecutionError, format!("request failed: {e}"))
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::OK {
            match response.json::<Value>().await {
                Ok(data) => ExecResult::ok(data)
                    .with_metadata("tool_type", json!("http"))
                    .with_metadata("capability", json!(capability)),
                Err(e) => ExecResult::err(
                    ErrorCode::ExecutionError,
                    format!("invalid JSON in response: {e}"),
                ),
            }
        } else {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(ERROR_SNIPPET_CHARS).collect();
            ExecResult::err(
                ErrorCode::ExecutionError,
                format!("API error {status}: {snippet}"),
            )
        }
    }

    /// `GET {base}/health` answering 200 within the deadline is healthy.
    pub async fn health_check(&self) -> HealthStatus {
        let url = format!("{}/health", self.base_url);
        let request = self
            .apply_auth(self.client.get(&url))
            .timeout(HEALTH_TIMEOUT);
        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status == reqwest::StatusCode::OK {
                    HealthStatus::ok(
                        self.metadata.name.clone(),
                        format!("API health check: {status}"),
                    )
                } else {
                    HealthStatus::failing(
                        self.metadata.name.clone(),
                        format!("API health check: {status}"),
                    )
                }
            }
            Err(e) => HealthStatus::failing(
                self.metadata.name.clone(),
                format!("API unreachable: {e}"),
            ),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

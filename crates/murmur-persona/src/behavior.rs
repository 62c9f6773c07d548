// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use murmur_bus::Message;
use murmur_config::PersonaConfig;

/// The persona-specific strategy plugged into a [`crate::PersonaAgent`].
///
/// Defaults implement the baseline semantics of the well-known message
/// types; concrete personas override what they support.
#[async_trait]
pub trait PersonaBehavior: Send + Sync {
    /// Handle `task.request`.  The returned value becomes the
    /// `task.response` content.  The default declines.
    async fn on_task_request(&self, config: &PersonaConfig, _message: &Message) -> Value {
        json!({
            "status": "error",
            "message": format!("Persona {} does not support task execution", config.name),
        })
    }

    /// Produce the reply text for `chat.request`.
    async fn generate_chat_response(&self, config: &PersonaConfig, text: &str) -> String {
        format!(
            "Hello! I am {}. I received your message: '{}'",
            config.name, text
        )
    }

    /// Called at the end of the shutdown sequence, after the agent has left
    /// the bus.  Release behavior-owned resources here.
    async fn on_shutdown(&self) {}
}

/// Marker behavior with only the defaults.  Useful for presence-style
/// personas and tests.
pub struct DefaultBehavior;

#[async_trait]
impl PersonaBehavior for DefaultBehavior {}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PersonaConfig {
        PersonaConfig {
            persona_id: "p1".into(),
            name: "Echo".into(),
            description: String::new(),
            capabilities: vec![],
            priority: 5,
            max_concurrent_tasks: 1,
            shutdown_token: None,
        }
    }

    #[tokio::test]
    async fn default_task_request_declines() {
        let behavior = DefaultBehavior;
        let msg = Message::new("a", "p1", "task.request", json!({}));
        let reply = behavior.on_task_request(&config(), &msg).await;
        assert_eq!(reply["status"], "error");
        assert!(reply["message"]
            .as_str()
            .unwrap()
            .contains("does not support task execution"));
    }

    #[tokio::test]
    async fn default_chat_response_mentions_the_persona() {
        let behavior = DefaultBehavior;
        let text = behavior.generate_chat_response(&config(), "hi").await;
        assert!(text.contains("Echo"));
        assert!(text.contains("hi"));
    }
}

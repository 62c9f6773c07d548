// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use murmur_bus::{Bus, BusError, Message, Participant, ParticipantStatus, BROADCAST};
use murmur_config::PersonaConfig;

use crate::behavior::PersonaBehavior;

type HandlerFuture = BoxFuture<'static, anyhow::Result<()>>;
/// Custom handler for message types outside the well-known set.  Registered
/// handlers take precedence over the built-in dispatch table.
pub type MessageHandler = Arc<dyn Fn(Arc<PersonaAgent>, Message) -> HandlerFuture + Send + Sync>;

#[derive(Debug, Default, Clone)]
struct PersonaMetrics {
    total_tasks: u64,
    successful_tasks: u64,
    failed_tasks: u64,
    avg_response_ms: f64,
    last_task_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaMetricsSnapshot {
    pub total_tasks: u64,
    pub successful_tasks: u64,
    pub failed_tasks: u64,
    pub avg_response_ms: f64,
    pub last_task_at: Option<DateTime<Utc>>,
}

/// A bus participant with default handlers for the well-known message
/// types, a `max_concurrent_tasks` guard, and task metrics.
///
/// Constructed with [`PersonaAgent::spawn`], which registers the agent on
/// the bus.  The bus holds only a weak reference: whoever spawned the
/// persona owns its lifetime.
pub struct PersonaAgent {
    config: PersonaConfig,
    behavior: Arc<dyn PersonaBehavior>,
    bus: Arc<Bus>,
    status: Mutex<ParticipantStatus>,
    metrics: Mutex<PersonaMetrics>,
    task_permits: Arc<Semaphore>,
    /// In-flight task handles keyed by the triggering message id; aborted
    /// on shutdown.
    active: Mutex<HashMap<String, JoinHandle<()>>>,
    custom_handlers: Mutex<HashMap<String, MessageHandler>>,
    self_ref: Weak<PersonaAgent>,
}

impl PersonaAgent {
    /// Build the agent and register it on the bus under its persona id.
    pub fn spawn(
        config: PersonaConfig,
        behavior: Arc<dyn PersonaBehavior>,
        bus: Arc<Bus>,
    ) -> Result<Arc<Self>, BusError> {
        let capabilities = config.capabilities.clone();
        let agent = Arc::new_cyclic(|weak| Self {
            task_permits: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            config,
            behavior,
            bus: bus.clone(),
            status: Mutex::new(ParticipantStatus::Idle),
            metrics: Mutex::new(PersonaMetrics::default()),
            active: Mutex::new(HashMap::new()),
            custom_handlers: Mutex::new(HashMap::new()),
            self_ref: weak.clone(),
        });
        bus.register(capabilities, agent.clone() as Arc<dyn Participant>)?;
        info!(persona = %agent.config.persona_id, "persona registered");
        Ok(agent)
    }

    pub fn persona_id(&self) -> &str {
        &self.config.persona_id
    }

    pub fn config(&self) -> &PersonaConfig {
        &self.config
    }

    pub fn status(&self) -> ParticipantStatus {
        *self.status.lock().expect("status lock poisoned")
    }

    pub fn metrics(&self) -> PersonaMetricsSnapshot {
        let m = self.metrics.lock().expect("metrics lock poisoned").clone();
        PersonaMetricsSnapshot {
            total_tasks: m.total_tasks,
            successful_tasks: m.successful_tasks,
            failed_tasks: m.failed_tasks,
            avg_response_ms: m.avg_response_ms,
            last_task_at: m.last_task_at,
        }
    }

    pub fn active_tasks(&self) -> usize {
        self.active.lock().expect("active lock poisoned").len()
    }

    /// Override or extend the dispatch table for a message type.
    pub fn register_handler(&self, message_type: impl Into<String>, handler: MessageHandler) {
        self.custom_handlers
            .lock()
            .expect("handlers lock poisoned")
            .insert(message_type.into(), handler);
    }

    // ── Outgoing ──────────────────────────────────────────────────────────────

    fn priority(&self) -> u8 {
        self.config.priority.clamp(1, 10)
    }

    pub async fn send(
        &self,
        receiver: &str,
        message_type: &str,
        content: Value,
    ) -> Result<String, BusError> {
        let msg = Message::new(self.persona_id(), receiver, message_type, content)
            .with_priority(self.priority());
        self.bus.send(msg).await
    }

    pub async fn broadcast(&self, message_type: &str, content: Value) -> Result<String, BusError> {
        self.send(BROADCAST, message_type, content).await
    }

    pub async fn send_and_wait(
        &self,
        receiver: &str,
        message_type: &str,
        content: Value,
        timeout: Duration,
    ) -> Result<Message, BusError> {
        let msg = Message::new(self.persona_id(), receiver, message_type, content)
            .with_priority(self.priority());
        self.bus.send_and_wait(msg, timeout).await
    }

    // ── Shutdown ──────────────────────────────────────────────────────────────

    /// Cancel in-flight tasks, announce the shutdown, leave the bus and let
    /// the behavior release its resources.
    pub async fn shutdown(&self) {
        info!(persona = %self.persona_id(), "persona shutting down");
        let handles: Vec<(String, JoinHandle<()>)> = self
            .active
            .lock()
            .expect("active lock poisoned")
            .drain()
            .collect();
        for (task_id, handle) in handles {
            debug!(persona = %self.persona_id(), task = %task_id, "cancelling in-flight task");
            handle.abort();
        }
        *self.status.lock().expect("status lock poisoned") = ParticipantStatus::Shutdown;

        let _ = self
            .broadcast(
                "status.update",
                json!({
                    "persona_id": self.persona_id(),
                    "name": self.config.name,
                    "status": "shutdown",
                    "timestamp": Utc::now().to_rfc3339(),
                }),
            )
            .await;
        if let Err(e) = self.bus.unregister(self.persona_id()) {
            debug!(persona = %self.persona_id(), error = %e, "already unregistered");
        }
        self.behavior.on_shutdown().await;
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    async fn dispatch(&self, message: &Message) -> anyhow::Result<()> {
        let custom = self
            .custom_handlers
            .lock()
            .expect("handlers lock poisoned")
            .get(&message.message_type)
            .cloned();
        if let Some(handler) = custom {
            let me = self.self_ref.upgrade().context("persona dropped")?;
            return handler(me, message.clone()).await;
        }
        match message.message_type.as_str() {
            "ping" => self.handle_ping(message).await,
            "status.request" => self.handle_status_request(message).await,
            "shutdown" => self.handle_shutdown(message).await,
            "heartbeat" => {
                debug!(
                    persona = %self.persona_id(),
                    from = %message.sender,
                    "heartbeat received"
                );
                Ok(())
            }
            "task.request" => self.handle_task_request(message).await,
            "chat.request" => self.handle_chat_request(message).await,
            other => {
                debug!(persona = %self.persona_id(), message_type = %other, "unhandled message type");
                Ok(())
            }
        }
    }

    async fn handle_ping(&self, message: &Message) -> anyhow::Result<()> {
        let reply = message.create_reply(
            json!({
                "status": "success",
                "timestamp": Utc::now().to_rfc3339(),
                "persona_status": self.status(),
            }),
            Some("pong"),
        );
        self.bus.send(reply).await?;
        Ok(())
    }

    async fn handle_status_request(&self, message: &Message) -> anyhow::Result<()> {
        let reply = message.create_reply(
            json!({
                "status": self.status(),
                "name": self.config.name,
                "persona_id": self.persona_id(),
                "capabilities": self.config.capabilities,
                "timestamp": Utc::now().to_rfc3339(),
                "metrics": self.metrics(),
                "active_tasks": self.active_tasks(),
            }),
            Some("status.response"),
        );
        self.bus.send(reply).await?;
        Ok(())
    }

    async fn handle_shutdown(&self, message: &Message) -> anyhow::Result<()> {
        if let Some(required) = &self.config.shutdown_token {
            let provided = message.content.get("auth_token").and_then(|v| v.as_str());
            if provided != Some(required.as_str()) {
                warn!(persona = %self.persona_id(), "unauthorized shutdown request");
                let reply = message.create_reply(
                    json!({"status": "error", "message": "Unauthorized shutdown request"}),
                    Some("error.unauthorized"),
                );
                self.bus.send(reply).await?;
                return Ok(());
            }
        }
        let reply = message.create_reply(
            json!({"status": "success", "message": "Shutting down..."}),
            Some("shutdown.accepted"),
        );
        self.bus.send(reply).await?;

        // Tear down outside the dispatcher's handler invocation.
        if let Some(me) = self.self_ref.upgrade() {
            tokio::spawn(async move {
                me.shutdown().await;
            });
        }
        Ok(())
    }

    async fn handle_task_request(&self, message: &Message) -> anyhow::Result<()> {
        let permit = match self.task_permits.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(persona = %self.persona_id(), "task rejected, at capacity");
                let reply = message.create_reply(
                    json!({"status": "error", "message": "persona at capacity"}),
                    Some("task.response"),
                );
                self.bus.send(reply).await?;
                return Ok(());
            }
        };

        let me = self.self_ref.upgrade().context("persona dropped")?;
        let msg = message.clone();
        let message_id = message.message_id.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            me.set_busy(true);
            let started = Instant::now();
            let content = me.behavior.on_task_request(&me.config, &msg).await;
            let success = content.get("status").and_then(|v| v.as_str()) == Some("success");
            me.record_task(success, started.elapsed());
            let reply = msg.create_reply(content, Some("task.response"));
            if let Err(e) = me.bus.send(reply).await {
                warn!(persona = %me.persona_id(), error = %e, "failed to send task response");
            }
            me.active
                .lock()
                .expect("active lock poisoned")
                .remove(&msg.message_id);
            me.set_busy(me.active_tasks() > 0);
        });
        self.active
            .lock()
            .expect("active lock poisoned")
            .insert(message_id, handle);
        Ok(())
    }

    async fn handle_chat_request(&self, message: &Message) -> anyhow::Result<()> {
        let text = message
            .content
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or_default();
        let response = self
            .behavior
            .generate_chat_response(&self.config, text)
            .await;
        let reply = message.create_reply(
            json!({
                "response": response,
                "metadata": {
                    "persona_id": self.persona_id(),
                    "timestamp": Utc::now().to_rfc3339(),
                },
            }),
            Some("chat.response"),
        );
        self.bus.send(reply).await?;
        Ok(())
    }

    fn set_busy(&self, busy: bool) {
        let status = if busy {
            ParticipantStatus::Busy
        } else {
            ParticipantStatus::Idle
        };
        {
            let mut current = self.status.lock().expect("status lock poisoned");
            if *current == ParticipantStatus::Shutdown {
                return;
            }
            *current = status;
        }
        let _ = self.bus.set_status(self.persona_id(), status);
    }

    fn record_task(&self, success: bool, elapsed: Duration) {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        metrics.total_tasks += 1;
        metrics.last_task_at = Some(Utc::now());
        let ms = elapsed.as_secs_f64() * 1000.0;
        let n = metrics.total_tasks as f64;
        metrics.avg_response_ms = (metrics.avg_response_ms * (n - 1.0) + ms) / n;
        if success {
            metrics.successful_tasks += 1;
        } else {
            metrics.failed_tasks += 1;
        }
    }
}

#[async_trait]
impl Participant for PersonaAgent {
    fn id(&self) -> &str {
        &self.config.persona_id
    }

    async fn handle_message(&self, message: Message) {
        if let Err(e) = self.dispatch(&message).await {
            error!(
                persona = %self.persona_id(),
                message_type = %message.message_type,
                message_id = %message.message_id,
                error = %e,
                "message handler failed"
            );
            let reply = message.create_reply(
                json!({
                    "status": "error",
                    "message": format!("Error processing message: {e}"),
                }),
                Some("error.processing"),
            );
            if let Err(send_err) = self.bus.send(reply).await {
                warn!(persona = %self.persona_id(), error = %send_err, "failed to send error reply");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::DefaultBehavior;

    fn config(id: &str) -> PersonaConfig {
        PersonaConfig {
            persona_id: id.into(),
            name: "Test".into(),
            description: String::new(),
            capabilities: vec!["task_execution".into()],
            priority: 7,
            max_concurrent_tasks: 2,
            shutdown_token: None,
        }
    }

    #[tokio::test]
    async fn spawn_registers_on_the_bus() {
        let bus = Bus::new();
        let agent = PersonaAgent::spawn(config("p1"), Arc::new(DefaultBehavior), bus.clone())
            .unwrap();
        assert_eq!(bus.participants(), vec!["p1".to_string()]);
        assert_eq!(bus.find_by_capability("task_execution"), vec!["p1"]);
        assert_eq!(agent.status(), ParticipantStatus::Idle);
    }

    #[tokio::test]
    async fn duplicate_spawn_is_rejected() {
        let bus = Bus::new();
        let _first = PersonaAgent::spawn(config("p1"), Arc::new(DefaultBehavior), bus.clone())
            .unwrap();
        let err = PersonaAgent::spawn(config("p1"), Arc::new(DefaultBehavior), bus.clone());
        assert!(matches!(err, Err(BusError::Duplicate(_))));
    }

    #[tokio::test]
    async fn metrics_running_average() {
        let bus = Bus::new();
        let agent = PersonaAgent::spawn(config("p1"), Arc::new(DefaultBehavior), bus).unwrap();
        agent.record_task(true, Duration::from_millis(10));
        agent.record_task(false, Duration::from_millis(30));
        let m = agent.metrics();
        assert_eq!(m.total_tasks, 2);
        assert_eq!(m.successful_tasks, 1);
        assert_eq!(m.failed_tasks, 1);
        assert!(m.avg_response_ms > 0.0);
        assert!(m.last_task_at.is_some());
    }

    #[tokio::test]
    async fn priority_is_clamped_on_outgoing_messages() {
        let bus = Bus::new();
        let mut cfg = config("p1");
        cfg.priority = 99;
        let agent = PersonaAgent::spawn(cfg, Arc::new(DefaultBehavior), bus).unwrap();
        assert_eq!(agent.priority(), 10);
    }
}

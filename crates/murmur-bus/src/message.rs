// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved receiver id that fans a message out to every registered
/// participant except its sender.
pub const BROADCAST: &str = "broadcast";

/// Envelope routed over the bus.
///
/// Immutable once constructed, except for the `processed` bookkeeping flag
/// set by the dispatcher after delivery.  `priority` is clamped to `1..=10`
/// on every construction path (10 is highest).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub sender: String,
    pub receiver: String,
    pub message_type: String,
    pub content: Value,
    /// Message id this message answers; presence marks it as a reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    pub priority: u8,
    #[serde(default)]
    pub headers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub processed: bool,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        message_type: impl Into<String>,
        content: Value,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            sender: sender.into(),
            receiver: receiver.into(),
            message_type: message_type.into(),
            content,
            reply_to: None,
            created_at: Utc::now(),
            expires_at: None,
            priority: 5,
            headers: serde_json::Map::new(),
            processed: false,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    pub fn with_correlation(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Absolute expiry `ttl` from now.
    pub fn expires_in(mut self, ttl: std::time::Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at = Some(Utc::now() + ttl);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Build a reply to this message: endpoints swapped, correlation and
    /// `reply_to` pointing back at this message, priority inherited.
    ///
    /// The default reply type is `reply:{original_type}`.
    pub fn create_reply(&self, content: Value, message_type: Option<&str>) -> Message {
        let reply_type = message_type
            .map(str::to_string)
            .unwrap_or_else(|| format!("reply:{}", self.message_type));
        Message {
            message_id: Uuid::new_v4().to_string(),
            correlation_id: Some(self.message_id.clone()),
            sender: self.receiver.clone(),
            receiver: self.sender.clone(),
            message_type: reply_type,
            content,
            reply_to: Some(self.message_id.clone()),
            created_at: Utc::now(),
            expires_at: None,
            priority: self.priority,
            headers: serde_json::Map::new(),
            processed: false,
        }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() > at,
            None => false,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a message from its JSON form, re-clamping the priority so
    /// out-of-range values from the wire cannot bypass the invariant.
    pub fn from_json(text: &str) -> serde_json::Result<Message> {
        let mut msg: Message = serde_json::from_str(text)?;
        msg.priority = msg.priority.clamp(1, 10);
        Ok(msg)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

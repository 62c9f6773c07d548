// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Message;

/// Contract implemented by everything that can receive bus messages.
///
/// Handlers are invoked sequentially by the single dispatcher task and MUST
/// be cooperative: long work belongs in a spawned task, not in the handler
/// body.  The bus holds implementors by weak reference — the registrar owns
/// the participant's lifetime.
#[async_trait]
pub trait Participant: Send + Sync {
    fn id(&self) -> &str;
    async fn handle_message(&self, message: Message);
}

/// Registry-visible lifecycle state of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    #[default]
    Idle,
    Busy,
    /// Unregistered or about to be; no further deliveries.
    Disabled,
    Shutdown,
}

impl ParticipantStatus {
    /// Whether the dispatcher may still deliver messages to this participant.
    pub fn accepts_messages(&self) -> bool {
        matches!(self, ParticipantStatus::Idle | ParticipantStatus::Busy)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Persona agents: bus participants with a dispatch table for the
//! well-known message types, a task concurrency guard and a metrics block.
//!
//! A [`PersonaAgent`] owns the plumbing — registration, replies, shutdown,
//! metrics — while everything persona-specific lives behind the
//! [`PersonaBehavior`] strategy.  Personas depend only on the interfaces
//! they use (the bus, the tool manager); the coordinator type never appears
//! here.

mod agent;
mod behavior;
mod executor;

pub use agent::{MessageHandler, PersonaAgent, PersonaMetricsSnapshot};
pub use behavior::{DefaultBehavior, PersonaBehavior};
pub use executor::TaskExecutorBehavior;

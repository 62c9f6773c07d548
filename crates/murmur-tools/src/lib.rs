// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Polymorphic tool execution layer.
//!
//! Four integration kinds behind one contract — in-process native tools,
//! long-lived JSON-RPC subprocesses, one-shot executables, and HTTP APIs —
//! modeled as the [`ToolInstance`] sum type rather than trait objects, so a
//! new kind is a compile error everywhere it matters.
//!
//! The [`ToolManager`] owns lifecycle (validate → instantiate → register →
//! health-probe), guards every call with a per-tool [`CircuitBreaker`] and an
//! execution deadline, and keeps per-tool metrics.  Execution never returns
//! an `Err`: failures of any shape come back as structured [`ExecResult`]s
//! with a wire-level error code.

mod breaker;
mod contracts;
mod error;
mod manager;
mod memory;
mod shortlist;

pub mod adapters;

pub use adapters::native::{NativeTool, NativeToolFactory};
pub use adapters::ToolInstance;
pub use breaker::{BreakerState, CircuitBreaker};
pub use contracts::{
    definition_to_tool, validate_required_fields, Capability, ErrorCode, ExecResult,
    ExecutionContext, HealthStatus, ResourceLimits, RiskLevel, ToolConfig, ToolKind, ToolMetadata,
    ToolState,
};
pub use error::ToolError;
pub use manager::{
    MetricsSnapshot, ToolExecutionOutcome, ToolExecutionRequest, ToolManager, ToolManagerSettings,
};
pub use memory::{InMemoryStore, Memory};
pub use shortlist::Shortlist;

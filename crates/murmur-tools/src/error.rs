// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("tool already loaded: {0}")]
    Duplicate(String),

    #[error("tool not found: {0}")]
    NotFound(String),

    #[error("unknown tool kind: {0}")]
    UnknownKind(String),

    #[error("unknown native entry point: {0}")]
    UnknownEntryPoint(String),
}

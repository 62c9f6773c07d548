// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("participant already registered: {0}")]
    Duplicate(String),

    #[error("participant not found: {0}")]
    NotFound(String),

    #[error("message expired before send: {0}")]
    Expired(String),

    #[error("timed out waiting for a reply to {0}")]
    ReplyTimeout(String),
}

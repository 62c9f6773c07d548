// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Helpers for digging structured JSON out of model responses.

/// Extract the JSON payload from a model response that may wrap it in a
/// markdown code fence.
///
/// Handles ```` ```json ... ``` ````, bare ```` ``` ... ``` ```` fences, and
/// unfenced responses (returned trimmed).  The model is untrusted: callers
/// still have to parse and validate the returned slice.
pub fn extract_json_block(text: &str) -> &str {
    if let Some(rest) = split_fence(text, "```json") {
        return rest;
    }
    if let Some(rest) = split_fence(text, "```") {
        return rest;
    }
    text.trim()
}

fn split_fence<'a>(text: &'a str, opening: &str) -> Option<&'a str> {
    let start = text.find(opening)? + opening.len();
    let rest = &text[start..];
    let end = rest.find("```")?;
    Some(rest[..end].trim())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
/// Opaque tool shortlisting service injected by the embedder.
///
/// Classifier- or BM25-backed implementations live outside the core; the
/// manager only asks "which tool ids fit this query" and never inspects how
/// the answer was produced.
pub trait Shortlist: Send + Sync {
    fn shortlist(&self, query: &str) -> Vec<String>;
}

/// Fallback shortlister: case-insensitive substring match over tool names,
/// descriptions and capability names.
///
/// Used by the manager when no external service is injected, so callers
/// always get an answer of the same shape.
pub(crate) fn naive_shortlist(
    query: &str,
    tools: impl Iterator<Item = (String, String, Vec<String>)>,
) -> Vec<String> {
    let needle = query.to_lowercase();
    let mut hits: Vec<String> = tools
        .filter(|(name, description, capabilities)| {
            name.to_lowercase().contains(&needle)
                || description.to_lowercase().contains(&needle)
                || capabilities
                    .iter()
                    .any(|c| c.to_lowercase().contains(&needle))
        })
        .map(|(name, _, _)| name)
        .collect();
    hits.sort();
    hits
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

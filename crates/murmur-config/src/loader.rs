// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Layered config loading.
//!
//! Configuration is assembled from YAML layers, lowest to highest priority:
//! system (`/etc/murmur`), user (`~/.config/murmur`), workspace-local
//! (`.murmur/config.*`, `.murmur.*`, `murmur.*`), then an explicit
//! `--config` path.  Mappings merge key-wise and scalars are overridden by
//! the higher layer, with one murmur-specific twist: the named-entry list
//! sections — `personas` (keyed by `persona_id`) and `tools.definitions`
//! (keyed by `name`) — merge entry-wise across layers, so a workspace file
//! can adjust a single persona or tool from the user layer without
//! restating the whole list.  Unkeyed lists (capabilities, dependencies)
//! are replaced wholesale.
//!
//! A layer that does not fit the schema is a hard error, not a silent fall
//! back to defaults: the runtime loads tools and spawns personas from this
//! file, and a typo that quietly erased them would surface much later as
//! `TOOL_NOT_FOUND`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_yaml::Value;
use tracing::debug;

use crate::Config;

/// Candidate config files, lowest to highest priority.  Every location
/// accepts both the `.yaml` and `.yml` spelling; `.yml` is read second and
/// therefore wins when both exist.
fn layer_paths() -> Vec<PathBuf> {
    let mut bases: Vec<PathBuf> = vec![PathBuf::from("/etc/murmur/config")];

    if let Some(home) = dirs::home_dir() {
        bases.push(home.join(".config/murmur/config"));
    }
    if let Some(cfg) = dirs::config_dir() {
        bases.push(cfg.join("murmur/config"));
    }

    // Workspace-local: directory form, hidden dotfile, plain file.
    bases.push(PathBuf::from(".murmur/config"));
    bases.push(PathBuf::from(".murmur"));
    bases.push(PathBuf::from("murmur"));

    bases
        .into_iter()
        .flat_map(|base| {
            ["yaml", "yml"]
                .into_iter()
                .map(move |ext| base.with_extension(ext))
        })
        .collect()
}

/// Load configuration by merging all discovered YAML layers.  The `extra`
/// argument may provide an explicit path (e.g. `--config` CLI flag); unlike
/// the discovered locations, a missing explicit file is an error.
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged: Option<Value> = None;

    for path in layer_paths() {
        if !path.is_file() {
            continue;
        }
        apply_layer(&mut merged, read_layer(&path)?, &path);
    }
    if let Some(path) = extra {
        apply_layer(&mut merged, read_layer(path)?, path);
    }

    let config: Config = match merged {
        None => Config::default(),
        Some(value) => serde_yaml::from_value(value)
            .context("config did not match the expected schema")?,
    };
    validate(&config)?;
    Ok(config)
}

fn read_layer(path: &Path) -> anyhow::Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let value: Value =
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    // An empty file is an empty layer, not a null override.
    Ok(match value {
        Value::Null => Value::Mapping(serde_yaml::Mapping::new()),
        other => other,
    })
}

fn apply_layer(merged: &mut Option<Value>, layer: Value, path: &Path) {
    debug!(path = %path.display(), "applying config layer");
    match merged {
        None => *merged = Some(layer),
        Some(dst) => merge_value(dst, layer, ""),
    }
}

/// Recursive merge of `src` over `dst`.  `path` is the dotted location in
/// the config tree, used to recognize the keyed-list sections.
fn merge_value(dst: &mut Value, src: Value, path: &str) {
    match (dst, src) {
        (Value::Mapping(d), Value::Mapping(s)) => {
            for (key, value) in s {
                let child = child_path(path, &key);
                match d.get_mut(&key) {
                    Some(slot) => merge_value(slot, value, &child),
                    None => {
                        d.insert(key, value);
                    }
                }
            }
        }
        (Value::Sequence(d), Value::Sequence(s)) => match entry_key(path) {
            Some(id_field) => merge_keyed_entries(d, s, id_field),
            None => *d = s,
        },
        (dst, src) => *dst = src,
    }
}

fn child_path(parent: &str, key: &Value) -> String {
    match (parent.is_empty(), key.as_str()) {
        (_, None) => parent.to_string(),
        (true, Some(name)) => name.to_string(),
        (false, Some(name)) => format!("{parent}.{name}"),
    }
}

/// The sections whose list entries carry a stable identity across layers.
fn entry_key(path: &str) -> Option<&'static str> {
    match path {
        "personas" => Some("persona_id"),
        "tools.definitions" => Some("name"),
        _ => None,
    }
}

/// Merge `src` entries into `dst` by `id_field`: a matching entry is merged
/// field-wise (so a layer can override just one setting of one persona),
/// everything else is appended in layer order.
fn merge_keyed_entries(dst: &mut Vec<Value>, src: Vec<Value>, id_field: &str) {
    for entry in src {
        let id = entry.get(id_field).cloned();
        let slot = id.as_ref().and_then(|id| {
            dst.iter_mut()
                .find(|existing| existing.get(id_field) == Some(id))
        });
        match slot {
            Some(existing) => merge_value(existing, entry, ""),
            None => dst.push(entry),
        }
    }
}

/// Cross-field checks the schema types cannot express.  Runs once on the
/// fully merged config.
fn validate(config: &Config) -> anyhow::Result<()> {
    let mut persona_ids = HashSet::new();
    for persona in &config.personas {
        if !persona_ids.insert(persona.persona_id.as_str()) {
            bail!("duplicate persona id in config: {}", persona.persona_id);
        }
    }
    let mut tool_names = HashSet::new();
    for definition in &config.tools.definitions {
        if !tool_names.insert(definition.name.as_str()) {
            bail!("duplicate tool definition in config: {}", definition.name);
        }
    }
    if config.tools.failure_threshold == 0 {
        bail!("tools.failure_threshold must be at least 1");
    }
    if config.bus.reply_timeout_secs == 0 {
        bail!("bus.reply_timeout_secs must be at least 1");
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

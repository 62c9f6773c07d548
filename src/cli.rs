// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// murmur — a multi-agent runtime: message bus, pluggable tools and an
/// LLM-feedback plan coordinator.
#[derive(Parser, Debug)]
#[command(name = "murmur", version, about)]
pub struct Cli {
    /// Path to an explicit config file (merged over the discovered layers).
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Execute a plan file to completion with model feedback after each step.
    ///
    /// The plan is YAML: either a bare task list or a `{title, tasks}`
    /// mapping.  Task outputs from earlier steps are substituted into later
    /// task parameters via `<task_ID_output>` / `<task-N_output>`
    /// placeholders.
    Run {
        /// Path to the plan file.
        plan: PathBuf,

        /// Print the run summary as JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Load the configured tools and print their registry and health report.
    Tools,

    /// Print the merged configuration and exit.
    ShowConfig,
}

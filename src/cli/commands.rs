//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// protectsync - Declarative membership reconciliation for cloud protection.
#[derive(Parser, Debug)]
#[command(name = "protectsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "PROTECTSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Keep the state record in memory only.
    #[arg(long, global = true)]
    pub no_state: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show the add/remove calls a reconciliation would issue.
    Plan {
        /// Only plan this grouping.
        #[arg(short, long)]
        grouping: Option<String>,
    },

    /// Reconcile groupings to their declared membership.
    Apply {
        /// Only reconcile this grouping.
        #[arg(short, long)]
        grouping: Option<String>,

        /// Continue with other groupings after a failure.
        #[arg(long)]
        continue_on_error: bool,

        /// Seconds to wait for convergence (overrides the configuration).
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Check for drift between configuration and the remote service.
    Drift,

    /// Remove every member from the configured groupings.
    Destroy {
        /// Confirm the removal.
        #[arg(long)]
        yes: bool,

        /// Only empty this grouping.
        #[arg(short, long)]
        grouping: Option<String>,
    },

    /// Show the locally recorded membership of each grouping.
    Status,

    /// Manage the local state record.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Lock the state.
    Lock {
        /// Lock holder identifier.
        #[arg(long)]
        holder: Option<String>,
    },

    /// Unlock the state.
    Unlock {
        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Force unlock (dangerous).
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

//! CLI module for protectsync.
//!
//! This module provides the command-line interface for planning, applying
//! and inspecting membership reconciliation.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;

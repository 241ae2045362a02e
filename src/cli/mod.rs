//! CLI module for the stagectl tool.
//!
//! Argument parsing and output rendering; the command handlers live in the
//! binary.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::{OutputFormatter, PlanEntry};

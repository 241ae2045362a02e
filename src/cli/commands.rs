//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// stagectl - Declarative warehouse stage reconciler.
#[derive(Parser, Debug)]
#[command(name = "stagectl")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the manifest file.
    #[arg(short, long, global = true, env = "STAGECTL_CONFIG")]
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

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a starter manifest.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the manifest without contacting the remote.
    Validate {
        /// Show warnings too.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what apply would do.
    Plan {
        /// Show every attribute change.
        #[arg(short, long)]
        detailed: bool,
    },

    /// Reconcile every stage in the manifest.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Number of stages reconciled concurrently.
        #[arg(long, default_value = "1")]
        parallel: usize,

        /// Drop stages recorded in state but no longer in the manifest.
        #[arg(long)]
        prune: bool,

        /// Recreate stages that were deleted out of band.
        #[arg(long)]
        recreate_missing: bool,
    },

    /// Report drift between the manifest and the remote.
    Drift,

    /// Drop stages recorded in state.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Only destroy the stage with this logical id.
        #[arg(long)]
        stage: Option<String>,
    },

    /// Inspect or unlock the state file.
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

        /// Remove the lock whoever holds it.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "stagectl",
            "apply",
            "--yes",
            "--parallel",
            "4",
            "--prune",
        ])
        .unwrap();
        match cli.command {
            Commands::Apply {
                yes,
                parallel,
                prune,
                recreate_missing,
            } => {
                assert!(yes);
                assert_eq!(parallel, 4);
                assert!(prune);
                assert!(!recreate_missing);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "stagectl",
            "drift",
            "--output",
            "json",
            "--log-format",
            "json",
            "-c",
            "stages.yaml",
        ])
        .unwrap();
        assert_eq!(cli.output, OutputFormat::Json);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.config, Some(PathBuf::from("stages.yaml")));
    }
}

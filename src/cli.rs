// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! The CLI is a thin driver over the engine surface: repository management,
//! selection mutation, info queries, and the two processing triggers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command-line arguments for `starbash`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "starbash",
    version,
    about = "Automatic calibration, stacking and post-processing for astrophotography sessions.",
    long_about = None
)]
pub struct CliArgs {
    /// State directory (default: $STARBASH_HOME or ~/.starbash).
    #[arg(long, value_name = "DIR")]
    pub base_dir: Option<PathBuf>,

    /// Terminal verbosity (error, warn, info, debug, trace).
    ///
    /// Overrides `STARBASH_LOG` and the `[log]` section of user.toml; the
    /// on-disk run log always keeps debug detail.
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Worker pool size for task execution.
    #[arg(long, default_value_t = 1)]
    pub jobs: usize,

    /// Skip the bundled default recipes.
    #[arg(long)]
    pub no_builtin_recipes: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Manage image/recipe repositories.
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },
    /// Restrict which sessions later commands operate on.
    Select {
        #[command(subcommand)]
        action: SelectAction,
    },
    /// Enumerate targets/instruments/filters under the current selection.
    Info {
        #[command(subcommand)]
        what: InfoKind,
    },
    /// Run the processing pipeline.
    Process {
        #[command(subcommand)]
        action: ProcessAction,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum RepoAction {
    /// Add a repository by URL or path and index its frames.
    Add { url: String },
    /// Remove a repository and its catalog rows.
    Remove { url: String },
    /// List loaded repositories.
    List,
    /// Re-scan all image repositories.
    Reindex {
        /// Re-read frames that are already indexed.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum SelectAction {
    /// Add a target to the selection.
    Target { name: String },
    /// Add an instrument to the selection.
    Instrument { name: String },
    /// Add a filter label to the selection.
    Filter { name: String },
    /// Add an image kind (light, flat, dark, bias) to the selection.
    Kind { kind: String },
    /// Only sessions on or after this date (YYYY-MM-DD).
    After { date: String },
    /// Only sessions on or before this date (YYYY-MM-DD).
    Before { date: String },
    /// Only sessions inside an inclusive date window.
    Between { start: String, end: String },
    /// Clear all selection criteria.
    Clear,
    /// Show the current selection.
    Show,
}

#[derive(Debug, Clone, Subcommand)]
pub enum InfoKind {
    Targets,
    Instruments,
    Filters,
}

#[derive(Debug, Clone, Subcommand)]
pub enum ProcessAction {
    /// Full pipeline for every target under the selection.
    Auto,
    /// Generate master calibration frames only.
    Masters,
}

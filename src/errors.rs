// src/errors.rs

//! Crate-wide error taxonomy.
//!
//! Variants are grouped by outcome rather than by module: configuration
//! errors abort the run, catalog errors drop the offending row, build errors
//! skip one target, execution errors fail one task and block its dependents.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StarbashError {
    // --- Configuration errors (fatal to the run) ---
    #[error("unknown repository scheme in '{0}'")]
    UnknownScheme(String),

    #[error("missing file: {0}")]
    MissingFile(PathBuf),

    #[error("import cycle detected while resolving '{0}'")]
    ImportCycle(String),

    #[error("import target not found: {0}")]
    ImportTargetNotFound(String),

    #[error("remote repository unavailable and no cached copy: {0}")]
    RemoteUnavailable(String),

    #[error("unresolved placeholders {placeholders:?} after expanding '{value}'")]
    UnresolvedTemplate {
        value: String,
        placeholders: Vec<String>,
    },

    #[error("unknown tool kind '{0}'")]
    UnknownToolKind(String),

    // --- Catalog errors (per-image / per-session) ---
    #[error("schema error for '{path}': {reason}")]
    Schema { path: String, reason: String },

    #[error("inconsistent session {key}: {reason}")]
    InconsistentSession { key: String, reason: String },

    // --- Build errors (per-target) ---
    #[error("no eligible stage for target '{0}'")]
    NoEligibleStage(String),

    #[error("cycle in task graph involving task '{0}'")]
    GraphCycle(String),

    #[error("target '{target}' has inputs produced by no task and absent on disk: {inputs:?}")]
    MissingInputs {
        target: String,
        inputs: Vec<String>,
    },

    // --- Execution errors (per-task) ---
    #[error("tool '{tool}' failed with exit code {code}:\n{stderr_excerpt}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr_excerpt: String,
    },

    #[error("tool '{tool}' timed out after {seconds}s")]
    ToolTimeout { tool: String, seconds: u64 },

    #[error("task '{task}' produced {found} outputs, expected at least {expected}")]
    TooFewOutputs {
        task: String,
        expected: usize,
        found: usize,
    },

    // --- Environment errors ---
    #[error("required tool '{tool}' not found on PATH ({hint})")]
    ToolMissing { tool: String, hint: String },

    // --- Wrapped lower-level failures ---
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StarbashError>;

// src/logging.rs

//! Logging setup: a level-filtered terminal stream plus a full debug run log
//! in the engine's state directory.
//!
//! The terminal level resolves from, in order: the `--log-level` flag, the
//! `STARBASH_LOG` environment variable, and the `[log]` section of
//! `user.toml`. The on-disk log at `<state>/cache/logs/starbash.log` always
//! records debug detail, for the same reason per-task tool logs stay in
//! their workspaces: a failed run must be diagnosable after the fact without
//! re-running anything.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::app::UserConfig;
use crate::paths::Layout;

/// Parse a level name as written on the CLI, in `STARBASH_LOG`, or in the
/// `[log]` section of `user.toml`.
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_lowercase().as_str() {
        "off" | "none" => Some(LevelFilter::OFF),
        "error" => Some(LevelFilter::ERROR),
        "warn" | "warning" => Some(LevelFilter::WARN),
        "info" => Some(LevelFilter::INFO),
        "debug" => Some(LevelFilter::DEBUG),
        "trace" => Some(LevelFilter::TRACE),
        _ => None,
    }
}

/// Pick the terminal level from the three sources, most specific first.
/// Unrecognized names fall through to the next source rather than aborting
/// the run over a typo.
fn resolve_level(
    cli_level: Option<&str>,
    env_level: Option<&str>,
    user: &UserConfig,
) -> LevelFilter {
    if let Some(name) = cli_level {
        match parse_level(name) {
            Some(level) => return level,
            None => eprintln!("ignoring unrecognized --log-level '{name}'"),
        }
    }
    if let Some(level) = env_level.and_then(parse_level) {
        return level;
    }
    user.log
        .level
        .as_deref()
        .and_then(parse_level)
        .unwrap_or(LevelFilter::INFO)
}

/// Initialise the global subscriber. Called once at startup, before the
/// engine opens; the state directory and `user.toml` are resolved exactly the
/// way [`crate::app::Starbash::open`] will resolve them, so both agree on
/// where the run log lives and what the user asked for.
pub fn init_logging(cli_level: Option<&str>, base_dir: Option<&Path>) -> Result<()> {
    let layout = Layout::at(Layout::resolve_base(base_dir))?;
    let user =
        UserConfig::load_or_create(&layout.user_config()).map_err(anyhow::Error::from)?;
    let env_level = std::env::var("STARBASH_LOG").ok();
    let level = resolve_level(cli_level, env_level.as_deref(), &user);

    let log_path = layout.run_log();
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating log directory {parent:?}"))?;
    }
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("opening run log at {log_path:?}"))?;

    let terminal = fmt::layer().with_target(true).with_filter(level);
    let run_log = fmt::layer()
        .with_writer(Arc::new(log_file))
        .with_ansi(false)
        .with_filter(LevelFilter::DEBUG);

    tracing_subscriber::registry()
        .with(terminal)
        .with(run_log)
        .init();
    Ok(())
}

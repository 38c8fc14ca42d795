// src/lib.rs

pub mod aliases;
pub mod app;
pub mod audit;
pub mod builtin;
pub mod catalog;
pub mod cli;
pub mod context;
pub mod errors;
pub mod exec;
pub mod graph;
pub mod ingest;
pub mod logging;
pub mod paths;
pub mod repo;
pub mod score;
pub mod select;
pub mod stage;
pub mod tools;
pub mod types;

use std::str::FromStr;
use std::sync::atomic::Ordering;

use tracing::{info, warn};

use crate::app::{AppOptions, Starbash};
use crate::catalog::parse_instant;
use crate::cli::{CliArgs, Command, InfoKind, ProcessAction, RepoAction, SelectAction};
use crate::errors::{Result, StarbashError};
use crate::types::ImageKind;

/// High-level entry point used by `main.rs`.
///
/// Returns the process exit code: 0 success, 1 partial failure (some targets
/// failed), 2 fatal (misconfiguration or invalid build).
pub async fn run(args: CliArgs) -> i32 {
    match run_inner(args).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            2
        }
    }
}

async fn run_inner(args: CliArgs) -> Result<i32> {
    let options = AppOptions {
        base_dir: args.base_dir.clone(),
        use_builtin_recipes: !args.no_builtin_recipes,
        jobs: args.jobs.max(1),
        ..Default::default()
    };
    let mut app = Starbash::open(options).await?;

    // Ctrl-C requests a cooperative cancel: the in-flight task finishes and
    // the rest of the run drains to cancelled.
    {
        let cancel = app.cancel_handle();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("cancel requested; finishing in-flight task");
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    match args.command {
        Command::Repo { action } => match action {
            RepoAction::Add { url } => {
                app.add_repo_ref(&url).await?;
                Ok(0)
            }
            RepoAction::Remove { url } => {
                app.remove_repo_ref(&url).await?;
                Ok(0)
            }
            RepoAction::List => {
                for repo in app.repos.repos() {
                    println!("[{}] {} ({})", repo.rank, repo.url, repo.kind);
                }
                Ok(0)
            }
            RepoAction::Reindex { force } => {
                app.reindex(force).await?;
                Ok(0)
            }
        },
        Command::Select { action } => {
            apply_selection(&mut app, action)?;
            Ok(0)
        }
        Command::Info { what } => {
            let values = match what {
                InfoKind::Targets => app.info_targets().await?,
                InfoKind::Instruments => app.info_instruments().await?,
                InfoKind::Filters => app.info_filters().await?,
            };
            for value in values {
                println!("{value}");
            }
            Ok(0)
        }
        Command::Process { action } => {
            let report = match action {
                ProcessAction::Auto => app.process_auto().await?,
                ProcessAction::Masters => app.process_masters().await?,
            };
            print!("{}", report.render());
            info!(
                succeeded = report.count(exec::TaskStatus::Succeeded),
                up_to_date = report.count(exec::TaskStatus::UpToDate),
                failed = report.count(exec::TaskStatus::Failed),
                blocked = report.count(exec::TaskStatus::Blocked),
                "run complete"
            );
            Ok(report.exit_code())
        }
    }
}

fn apply_selection(app: &mut Starbash, action: SelectAction) -> Result<()> {
    match action {
        SelectAction::Target { name } => {
            let normalized = aliases::normalize_target(&name);
            app.selection.add_target(normalized)?;
        }
        SelectAction::Instrument { name } => app.selection.add_instrument(name)?,
        SelectAction::Filter { name } => {
            let normalized = app.aliases.normalize(&name);
            app.selection.add_filter(normalized)?;
        }
        SelectAction::Kind { kind } => {
            let kind = ImageKind::from_str(&kind)
                .map_err(|e| StarbashError::Other(anyhow::anyhow!(e)))?;
            app.selection.add_kind(kind)?;
        }
        SelectAction::After { date } => {
            app.selection.set_after(Some(parse_date_arg(&date)?))?;
        }
        SelectAction::Before { date } => {
            app.selection.set_before(Some(parse_date_arg(&date)?))?;
        }
        SelectAction::Between { start, end } => {
            app.selection
                .set_between(parse_date_arg(&start)?, parse_date_arg(&end)?)?;
        }
        SelectAction::Clear => app.selection.clear()?,
        SelectAction::Show => println!("{}", app.selection.summary()),
    }
    Ok(())
}

/// Accept a bare date (`2025-07-15`) or a full timestamp.
fn parse_date_arg(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    if let Some(instant) = parse_instant(raw) {
        return Ok(instant);
    }
    if let Ok(date) = chrono::NaiveDate::from_str(raw) {
        let midnight = date.and_hms_opt(0, 0, 0).expect("valid midnight");
        return Ok(chrono::DateTime::from_naive_utc_and_offset(
            midnight,
            chrono::Utc,
        ));
    }
    Err(StarbashError::Other(anyhow::anyhow!(
        "unparseable date '{raw}' (expected YYYY-MM-DD)"
    )))
}

// src/tools/stacker.rs

//! Stacker tool: a Siril-like non-interactive subprocess that takes its
//! command script on standard input and leaves FITS files in the workspace.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::context::ProcessingContext;
use crate::errors::Result;
use crate::graph::ToolInvocation;

use super::{run_process, Runner, ToolOutput};

pub(super) async fn run(
    runner: &Runner,
    invocation: &ToolInvocation,
    workspace: &Path,
    ctx: &ProcessingContext,
) -> Result<ToolOutput> {
    let mut program_words = runner.config.stacker_program.split_whitespace();
    let program = program_words.next().unwrap_or("siril-cli");
    if super::which(program).is_none() {
        return Err(crate::errors::StarbashError::ToolMissing {
            tool: program.to_string(),
            hint: "install the stacking tool or set tool.stacker.program".to_string(),
        });
    }

    let mut command = Command::new(program);
    for word in program_words {
        command.arg(word);
    }
    for template in &runner.config.stacker_args {
        command.arg(ctx.expand(template)?);
    }
    command.current_dir(workspace);

    // The command script may still reference the workspace, which only binds
    // at dispatch time.
    let script = ctx.expand(&invocation.command)?;
    debug!(
        program,
        workspace = %workspace.display(),
        script_lines = script.lines().count(),
        "running stacker"
    );

    let output = run_process(
        command,
        Some(script),
        invocation.timeout_s,
        "stacker",
    )
    .await?;

    // Allow-listed warnings stay out of user-facing logs; the on-disk task
    // log retains the full stderr.
    for line in output.stderr.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let suppressed = runner
            .config
            .warning_allowlist
            .iter()
            .any(|pattern| line.contains(pattern.as_str()));
        if suppressed {
            debug!(line, "suppressed stacker warning");
        } else {
            warn!(line, "stacker stderr");
        }
    }

    Ok(output)
}

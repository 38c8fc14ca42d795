// src/tools/script.rs

//! Script tool: a deliberately tiny line-based evaluator for glue stages.
//!
//! The evaluation environment exposes only the processing context, a logging
//! sink, and a handful of file operations confined to the workspace. There is
//! no import mechanism, no shelling out, and no path may leave the workspace.
//!
//! Directives, one per line (`#` comments and blank lines ignored):
//!
//! ```text
//! set <key> = <template>    # bind a context key for later lines
//! log <template>            # log a line (also kept in the task log)
//! emit <template>           # append a line to the script's stdout
//! touch <relative-path>     # create an empty file in the workspace
//! copy <src> <dst>          # copy a file within the workspace
//! ```

use std::path::{Component, Path, PathBuf};
use std::time::Instant;

use tracing::info;

use crate::context::ProcessingContext;
use crate::errors::{Result, StarbashError};
use crate::graph::ToolInvocation;

use super::ToolOutput;

fn fail(line_no: usize, message: String) -> StarbashError {
    StarbashError::ToolFailed {
        tool: "script".to_string(),
        code: 1,
        stderr_excerpt: format!("line {line_no}: {message}"),
    }
}

/// Resolve a script-relative path inside the workspace, rejecting anything
/// absolute or climbing out.
fn workspace_path(workspace: &Path, raw: &str, line_no: usize) -> Result<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
    {
        return Err(fail(
            line_no,
            format!("path '{raw}' leaves the workspace"),
        ));
    }
    Ok(workspace.join(path))
}

pub(super) fn run(
    invocation: &ToolInvocation,
    workspace: &Path,
    ctx: &ProcessingContext,
) -> Result<ToolOutput> {
    let started = Instant::now();
    let mut local = ctx.clone();
    let mut stdout = String::new();

    for (index, raw_line) in invocation.command.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (directive, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();

        match directive {
            "set" => {
                let (key, template) = rest
                    .split_once('=')
                    .ok_or_else(|| fail(line_no, "set needs '<key> = <value>'".into()))?;
                let value = local.expand(template.trim())?;
                local.set(key.trim().to_string(), value);
            }
            "log" => {
                let message = local.expand(rest)?;
                info!(script = true, "{message}");
                stdout.push_str(&message);
                stdout.push('\n');
            }
            "emit" => {
                let message = local.expand(rest)?;
                stdout.push_str(&message);
                stdout.push('\n');
            }
            "touch" => {
                let target = workspace_path(workspace, &local.expand(rest)?, line_no)?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, b"")?;
            }
            "copy" => {
                let expanded = local.expand(rest)?;
                let mut parts = expanded.split_whitespace();
                let (src, dst) = match (parts.next(), parts.next(), parts.next()) {
                    (Some(src), Some(dst), None) => (src, dst),
                    _ => return Err(fail(line_no, "copy needs '<src> <dst>'".into())),
                };
                let src = workspace_path(workspace, src, line_no)?;
                let dst = workspace_path(workspace, dst, line_no)?;
                if let Some(parent) = dst.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&src, &dst)?;
            }
            other => {
                return Err(fail(line_no, format!("unknown directive '{other}'")));
            }
        }
    }

    Ok(ToolOutput {
        exit_code: 0,
        stdout,
        stderr: String::new(),
        duration: started.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ToolKind;

    fn invocation(script: &str) -> ToolInvocation {
        ToolInvocation {
            kind: ToolKind::Script,
            command: script.to_string(),
            args: Vec::new(),
            timeout_s: 60,
        }
    }

    #[test]
    fn touch_and_copy_stay_in_the_workspace() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ProcessingContext::new();
        let script = "touch a.fits\ncopy a.fits b.fits\n";
        let output = run(&invocation(script), tmp.path(), &ctx).unwrap();
        assert_eq!(output.exit_code, 0);
        assert!(tmp.path().join("a.fits").exists());
        assert!(tmp.path().join("b.fits").exists());
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ProcessingContext::new();
        assert!(run(&invocation("touch ../escape.txt"), tmp.path(), &ctx).is_err());
        assert!(run(&invocation("touch /tmp/abs.txt"), tmp.path(), &ctx).is_err());
    }

    #[test]
    fn set_binds_for_later_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ctx = ProcessingContext::new();
        ctx.set("target", "m31");
        let script = "set name = {target}_final\nemit {name}\n";
        let output = run(&invocation(script), tmp.path(), &ctx).unwrap();
        assert_eq!(output.stdout, "m31_final\n");
    }

    #[test]
    fn unknown_directives_fail() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ProcessingContext::new();
        let err = run(&invocation("delete everything"), tmp.path(), &ctx).unwrap_err();
        assert!(matches!(err, StarbashError::ToolFailed { .. }));
    }

    #[test]
    fn comments_and_blanks_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ProcessingContext::new();
        let output = run(&invocation("# nothing\n\nemit done\n"), tmp.path(), &ctx).unwrap();
        assert_eq!(output.stdout, "done\n");
    }
}

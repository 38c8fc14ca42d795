// src/tools/mod.rs

//! Tool runtime: one `run` contract over the three tool kinds.
//!
//! Each invocation produces a per-task log file in the workspace, honors a
//! hard timeout, and reports a bounded stderr excerpt on failure. Adding a
//! tool kind is adding an enum variant and a dispatcher arm.

pub mod image_tool;
pub mod script;
pub mod stacker;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::context::ProcessingContext;
use crate::errors::{Result, StarbashError};
use crate::graph::ToolInvocation;
use crate::repo::RepoManager;
use crate::stage::ToolKind;

/// Name of the per-task log file written into each workspace.
pub const TASK_LOG_NAME: &str = "task.log";

/// Result of one tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Programs and knobs for the external tools, read from the repository union.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Stacker executable; may contain leading arguments ("flatpak run ...").
    pub stacker_program: String,
    /// Stacker argument templates; `{workspace}` binds at dispatch.
    pub stacker_args: Vec<String>,
    /// Image tool executable.
    pub image_tool_program: String,
    /// Stderr lines matching any of these patterns are suppressed from
    /// user-facing logs (the on-disk log keeps everything).
    pub warning_allowlist: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            stacker_program: "siril-cli".to_string(),
            stacker_args: vec![
                "-d".to_string(),
                "{workspace}".to_string(),
                "-s".to_string(),
                "-".to_string(),
            ],
            image_tool_program: "graxpert".to_string(),
            warning_allowlist: vec!["sequence not found".to_string()],
        }
    }
}

impl ToolConfig {
    /// Read tool configuration from the loaded repositories (last wins).
    pub fn from_repos(repos: &RepoManager) -> Self {
        let mut config = Self::default();
        if let Some(program) = repos.get_str("tool.stacker.program") {
            config.stacker_program = program.to_string();
        }
        if let Some((value, _)) = repos.get("tool.stacker.args") {
            if let Some(args) = value.as_array() {
                config.stacker_args = args
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
            }
        }
        if let Some(program) = repos.get_str("tool.image-tool.program") {
            config.image_tool_program = program.to_string();
        }
        if let Some((value, _)) = repos.get("tool.stacker.warning-allowlist") {
            if let Some(patterns) = value.as_array() {
                config.warning_allowlist = patterns
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect();
            }
        }
        config
    }
}

/// Dispatches invocations to the tool implementations.
#[derive(Debug, Clone)]
pub struct Runner {
    pub config: ToolConfig,
}

impl Runner {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    /// Run one invocation in the given workspace.
    ///
    /// Non-zero exits surface as [`StarbashError::ToolFailed`], timeouts as
    /// [`StarbashError::ToolTimeout`]; in both cases the on-disk log remains
    /// for diagnosis.
    pub async fn run(
        &self,
        invocation: &ToolInvocation,
        workspace: &Path,
        ctx: &ProcessingContext,
    ) -> Result<ToolOutput> {
        let output = match invocation.kind {
            ToolKind::Stacker => stacker::run(self, invocation, workspace, ctx).await?,
            ToolKind::ImageTool => image_tool::run(self, invocation, workspace, ctx).await?,
            ToolKind::Script => script::run(invocation, workspace, ctx)?,
        };

        write_task_log(workspace, invocation, &output)?;

        if output.exit_code != 0 {
            return Err(StarbashError::ToolFailed {
                tool: invocation.kind.to_string(),
                code: output.exit_code,
                stderr_excerpt: stderr_excerpt(&output.stderr),
            });
        }
        Ok(output)
    }

    /// Startup check: warn about tools missing from `PATH`.
    pub fn preflight(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        let stacker = self
            .config
            .stacker_program
            .split_whitespace()
            .next()
            .unwrap_or_default();
        if which(stacker).is_none() {
            warnings.push(format!(
                "stacker '{stacker}' not found on PATH; stacking tasks will fail"
            ));
        }
        if which(&self.config.image_tool_program).is_none() {
            warnings.push(format!(
                "image tool '{}' not found on PATH; post-processing tasks will fail",
                self.config.image_tool_program
            ));
        }
        warnings
    }
}

/// Locate an executable on `PATH`.
pub fn which(program: &str) -> Option<PathBuf> {
    if program.contains('/') {
        let path = PathBuf::from(program);
        return path.exists().then_some(path);
    }
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

/// Bounded stderr excerpt: first 5 and last 10 lines.
pub fn stderr_excerpt(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().collect();
    if lines.len() <= 15 {
        return stderr.trim_end().to_string();
    }
    let mut excerpt: Vec<&str> = lines[..5].to_vec();
    excerpt.push("[...]");
    excerpt.extend(&lines[lines.len() - 10..]);
    excerpt.join("\n")
}

fn write_task_log(workspace: &Path, invocation: &ToolInvocation, output: &ToolOutput) -> Result<()> {
    let log = format!(
        "tool: {}\nexit: {}\nelapsed: {:.2}s\n\n--- command ---\n{}\n\n--- stdout ---\n{}\n\n--- stderr ---\n{}\n",
        invocation.kind,
        output.exit_code,
        output.duration.as_secs_f64(),
        invocation.command,
        output.stdout,
        output.stderr,
    );
    std::fs::write(workspace.join(TASK_LOG_NAME), log)?;
    Ok(())
}

/// Run a subprocess with optional stdin payload and a hard timeout.
pub(crate) async fn run_process(
    mut command: Command,
    stdin_payload: Option<String>,
    timeout_s: u64,
    tool_name: &str,
) -> Result<ToolOutput> {
    command
        .stdin(if stdin_payload.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let started = Instant::now();
    let mut child = command.spawn()?;

    if let Some(payload) = stdin_payload {
        if let Some(mut stdin) = child.stdin.take() {
            // A tool that exits without reading its script closes the pipe;
            // the exit status below is the interesting failure, not EPIPE.
            if let Err(err) = stdin.write_all(payload.as_bytes()).await {
                debug!(tool = tool_name, error = %err, "stdin write failed");
            }
            // Dropping closes the pipe so script-mode tools see EOF.
        }
    }

    let stdout_handle = child.stdout.take().map(read_to_string_task);
    let stderr_handle = child.stderr.take().map(read_to_string_task);

    let status = match tokio::time::timeout(
        Duration::from_secs(timeout_s),
        child.wait(),
    )
    .await
    {
        Ok(status) => status?,
        Err(_) => {
            warn!(tool = tool_name, timeout_s, "tool timed out, killing");
            let _ = child.kill().await;
            return Err(StarbashError::ToolTimeout {
                tool: tool_name.to_string(),
                seconds: timeout_s,
            });
        }
    };

    let stdout = match stdout_handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };
    let stderr = match stderr_handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };

    let exit_code = status.code().unwrap_or(-1);
    debug!(tool = tool_name, exit_code, "tool process exited");
    Ok(ToolOutput {
        exit_code,
        stdout,
        stderr,
        duration: started.elapsed(),
    })
}

fn read_to_string_task<R>(reader: R) -> tokio::task::JoinHandle<String>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        use tokio::io::AsyncReadExt;
        let mut reader = reader;
        let mut buffer = String::new();
        let _ = reader.read_to_string(&mut buffer).await;
        buffer
    })
}

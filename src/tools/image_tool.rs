// src/tools/image_tool.rs

//! Image tool: a GraXpert-like subprocess invoked with an explicit argument
//! list derived from the stage's parameters.

use std::path::Path;

use tokio::process::Command;
use tracing::debug;

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
    if super::which(&runner.config.image_tool_program).is_none() {
        return Err(crate::errors::StarbashError::ToolMissing {
            tool: runner.config.image_tool_program.clone(),
            hint: "install the image tool or set tool.image-tool.program".to_string(),
        });
    }

    let mut command = Command::new(&runner.config.image_tool_program);
    for template in &invocation.args {
        command.arg(ctx.expand(template)?);
    }
    command.current_dir(workspace);

    debug!(
        program = %runner.config.image_tool_program,
        args = invocation.args.len(),
        workspace = %workspace.display(),
        "running image tool"
    );

    run_process(command, None, invocation.timeout_s, "image-tool").await
}

// src/graph/task.rs

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::catalog::ImageRecord;
use crate::context::ProcessingContext;
use crate::stage::ToolKind;

/// One input file of a task, with the name it gets inside the workspace.
///
/// Sequence-style tools want predictable names (`light_s12_00001.fits`), so
/// the link name is fixed at build time rather than derived from the source
/// basename at materialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInput {
    pub path: PathBuf,
    pub link_name: String,
}

/// Resolved tool invocation for a task.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub kind: ToolKind,
    /// Script body for stacker/script tools (already context-expanded).
    pub command: String,
    /// Argument list for argv-style tools (already context-expanded).
    pub args: Vec<String>,
    /// Hard timeout, seconds.
    pub timeout_s: u64,
}

/// What running a task actually does.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskAction {
    Tool(ToolInvocation),
    /// Degenerate master generation: exactly one input frame, copied through.
    Copy,
}

impl TaskAction {
    /// Stable string folded into the up-to-date signature.
    pub fn signature_text(&self) -> String {
        match self {
            TaskAction::Tool(tool) => format!(
                "{}\n{}\n{}",
                tool.kind,
                tool.command,
                tool.args.join("\u{1f}")
            ),
            TaskAction::Copy => "copy".to_string(),
        }
    }

    pub fn tool_kind(&self) -> Option<ToolKind> {
        match self {
            TaskAction::Tool(tool) => Some(tool.kind),
            TaskAction::Copy => None,
        }
    }
}

/// A generated master to publish into the catalog after the task succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterPublish {
    pub record: ImageRecord,
}

/// A materialized unit in the dependency graph.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique within the graph: stage + target + session + disambiguator.
    pub name: String,
    pub stage_name: String,
    /// Repo-qualified stage name, for the audit record.
    pub stage_long_name: String,
    pub target: String,
    pub session_ids: Vec<i64>,
    pub inputs: Vec<TaskInput>,
    pub outputs: Vec<PathBuf>,
    pub action: TaskAction,
    /// Per-task workspace directory (deterministic, reruns reuse it).
    pub workdir: PathBuf,
    /// Names of tasks whose outputs feed this one.
    pub deps: BTreeSet<String>,
    pub min_outputs: usize,
    /// Stage priority, used during culling.
    pub priority: i64,
    /// True for stages fed by globs: inputs the upstream chose not to
    /// produce convert the ready task to `skipped-guard` instead of failing.
    pub lenient_inputs: bool,
    pub context: ProcessingContext,
    /// Set when this task generates a master frame.
    pub publish_master: Option<MasterPublish>,
}

impl Task {
    pub fn input_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.inputs.iter().map(|i| &i.path)
    }
}

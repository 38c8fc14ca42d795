// src/exec/executor.rs

//! Incremental executor: walk the task DAG in deterministic topological
//! order, skip tasks whose content signature is unchanged, dispatch the rest
//! through the tool runtime.
//!
//! The dispatch layer is a ready-queue plus a worker pool. The default worker
//! count is 1, but readiness is expressed purely through the DAG and content
//! signatures, so raising the count executes independent branches
//! concurrently without further changes. Catalog and signature writes stay on
//! the coordinating loop, so master publication is serialized even with many
//! workers.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::errors::{Result, StarbashError};
use crate::graph::{BuiltGraph, Task, TaskAction};
use crate::tools::Runner;

use super::report::{ReportRow, RunReport, TaskStatus};
use super::signature::{compute_signature, SignatureStore};
use super::workspace;

/// Cooperative cancellation: set by the driver's signal handler, checked at
/// task boundaries. In-flight subprocesses are allowed to finish.
pub type CancelFlag = Arc<AtomicBool>;

#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Worker pool size; independent ready tasks run concurrently.
    pub jobs: usize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Pending,
    Running,
    Done(TaskStatus),
}

/// Result a worker hands back to the coordinating loop.
struct WorkerResult {
    name: String,
    outcome: Result<String>,
}

pub struct Executor<'a> {
    catalog: &'a Catalog,
    store: &'a SignatureStore,
    runner: Runner,
    options: ExecOptions,
    cancel: CancelFlag,
}

impl<'a> Executor<'a> {
    pub fn new(
        catalog: &'a Catalog,
        store: &'a SignatureStore,
        runner: Runner,
        options: ExecOptions,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            catalog,
            store,
            runner,
            options,
            cancel,
        }
    }

    /// Execute one built graph, returning a row per task.
    pub async fn execute(&self, graph: &BuiltGraph) -> Result<RunReport> {
        let tasks = &graph.tasks;
        let mut states: HashMap<String, State> = tasks
            .keys()
            .map(|name| (name.clone(), State::Pending))
            .collect();
        let mut notes: HashMap<String, String> = HashMap::new();

        let mut pending_deps: HashMap<String, usize> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (name, task) in tasks {
            pending_deps.insert(name.clone(), task.deps.len());
            for dep in &task.deps {
                dependents.entry(dep.clone()).or_default().push(name.clone());
            }
        }

        // Deterministic order among equally-ready tasks: BTreeSet iterates by
        // task name.
        let mut ready: BTreeSet<String> = pending_deps
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(name, _)| name.clone())
            .collect();

        let mut workers: JoinSet<WorkerResult> = JoinSet::new();
        let mut running = 0usize;

        loop {
            // Dispatch until the pool is full; a cancel request stops new
            // dispatches but lets in-flight tasks finish.
            while running < self.options.jobs && !self.cancel.load(Ordering::SeqCst) {
                let Some(name) = ready.iter().next().cloned() else {
                    break;
                };
                ready.remove(&name);
                let task = &tasks[&name];

                // Dynamic guard phase: stages fed by globs tolerate inputs
                // that upstream chose not to produce.
                if task.lenient_inputs {
                    let missing: Vec<String> = task
                        .input_paths()
                        .filter(|p| !p.exists())
                        .map(|p| p.display().to_string())
                        .collect();
                    if !missing.is_empty() {
                        notes.insert(
                            name.clone(),
                            format!("inputs not produced upstream: {}", missing.join(", ")),
                        );
                        self.finish(
                            &name,
                            TaskStatus::SkippedGuard,
                            &mut states,
                            &mut pending_deps,
                            &dependents,
                            &mut ready,
                            &mut notes,
                        );
                        continue;
                    }
                }

                let signature = match compute_signature(task) {
                    Ok(signature) => signature,
                    Err(err) => {
                        // An unreadable input fails this task, not the run.
                        warn!(task = %name, error = %err, "cannot hash inputs");
                        notes.insert(name.clone(), err.to_string());
                        self.finish(
                            &name,
                            TaskStatus::Failed,
                            &mut states,
                            &mut pending_deps,
                            &dependents,
                            &mut ready,
                            &mut notes,
                        );
                        continue;
                    }
                };
                let outputs_exist = task.outputs.iter().all(|o| o.exists());
                if outputs_exist
                    && self.store.get(&name).await?.as_deref() == Some(signature.as_str())
                {
                    debug!(task = %name, "up to date, skipping");
                    self.finish(
                        &name,
                        TaskStatus::UpToDate,
                        &mut states,
                        &mut pending_deps,
                        &dependents,
                        &mut ready,
                        &mut notes,
                    );
                    continue;
                }

                info!(task = %name, "dispatching task");
                states.insert(name.clone(), State::Running);
                running += 1;
                let task = task.clone();
                let runner = self.runner.clone();
                workers.spawn(async move {
                    let outcome = run_one(&task, &runner, signature).await;
                    WorkerResult {
                        name: task.name,
                        outcome,
                    }
                });
            }

            if running == 0 {
                break;
            }

            let Some(joined) = workers.join_next().await else {
                break;
            };
            running -= 1;
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => {
                    warn!(error = %join_err, "worker panicked");
                    continue;
                }
            };

            match result.outcome {
                Ok(signature) => {
                    // Signature persists only on clean exit; catalog writes
                    // are serialized here on the coordinating loop.
                    self.store.set(&result.name, &signature).await?;
                    if let Some(publish) = &tasks[&result.name].publish_master {
                        self.catalog.publish_master(&publish.record).await?;
                        info!(
                            master = %publish.record.path,
                            "generated master published to catalog"
                        );
                    }
                    self.finish(
                        &result.name,
                        TaskStatus::Succeeded,
                        &mut states,
                        &mut pending_deps,
                        &dependents,
                        &mut ready,
                        &mut notes,
                    );
                }
                Err(err) => {
                    warn!(task = %result.name, error = %err, "task failed");
                    notes.insert(result.name.clone(), err.to_string());
                    self.finish(
                        &result.name,
                        TaskStatus::Failed,
                        &mut states,
                        &mut pending_deps,
                        &dependents,
                        &mut ready,
                        &mut notes,
                    );
                }
            }
        }

        // Whatever never became ready (cancelled run) drains to cancelled.
        let cancelled = self.cancel.load(Ordering::SeqCst);
        for (name, state) in states.iter_mut() {
            if !matches!(state, State::Done(_)) {
                let status = if cancelled {
                    TaskStatus::Cancelled
                } else {
                    TaskStatus::Blocked
                };
                debug!(task = %name, status = %status, "task never ran");
                *state = State::Done(status);
            }
        }

        let mut report = RunReport::default();
        for (name, state) in &states {
            let State::Done(status) = state else {
                continue;
            };
            let task = &tasks[name];
            report.rows.push(ReportRow {
                target: task.target.clone(),
                session: task
                    .session_ids
                    .iter()
                    .map(|id| format!("s{id}"))
                    .collect::<Vec<_>>()
                    .join("+"),
                task: name.clone(),
                status: *status,
                note: notes.get(name).cloned().unwrap_or_default(),
            });
        }
        report.rows.sort_by(|a, b| a.task.cmp(&b.task));
        Ok(report)
    }

    /// Mark a task terminal and propagate to dependents: satisfied deps make
    /// tasks ready; failures block the whole downstream cone; guard skips
    /// propagate as guard skips.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        name: &str,
        status: TaskStatus,
        states: &mut HashMap<String, State>,
        pending_deps: &mut HashMap<String, usize>,
        dependents: &HashMap<String, Vec<String>>,
        ready: &mut BTreeSet<String>,
        notes: &mut HashMap<String, String>,
    ) {
        states.insert(name.to_string(), State::Done(status));

        if status.satisfies_dependents() {
            if let Some(children) = dependents.get(name) {
                for child in children {
                    let count = pending_deps.get_mut(child).expect("known task");
                    *count = count.saturating_sub(1);
                    if *count == 0 && states.get(child) == Some(&State::Pending) {
                        ready.insert(child.clone());
                    }
                }
            }
            return;
        }

        // Block (or guard-skip) the downstream cone.
        let downstream_status = if status == TaskStatus::SkippedGuard {
            TaskStatus::SkippedGuard
        } else {
            TaskStatus::Blocked
        };
        let mut stack: Vec<String> = dependents.get(name).cloned().unwrap_or_default();
        while let Some(child) = stack.pop() {
            if matches!(states.get(&child), Some(State::Done(_))) {
                continue;
            }
            notes
                .entry(child.clone())
                .or_insert_with(|| format!("upstream '{name}' ended {status}"));
            states.insert(child.clone(), State::Done(downstream_status));
            ready.remove(&child);
            stack.extend(dependents.get(&child).cloned().unwrap_or_default());
        }
    }
}

/// Run one task to completion in its workspace. Returns the signature to
/// persist on success.
async fn run_one(task: &Task, runner: &Runner, signature: String) -> Result<String> {
    workspace::prepare(task)?;
    workspace::materialize_inputs(task)?;

    let mut ctx = task.context.clone();
    ctx.set("workspace", task.workdir.display().to_string());

    match &task.action {
        TaskAction::Copy => {
            let input = task.inputs.first().ok_or_else(|| {
                StarbashError::Other(anyhow::anyhow!("copy task '{}' has no input", task.name))
            })?;
            let output = task.outputs.first().ok_or_else(|| {
                StarbashError::Other(anyhow::anyhow!("copy task '{}' has no output", task.name))
            })?;
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&input.path, output)?;
            debug!(task = %task.name, "single-frame master copied through");
        }
        TaskAction::Tool(invocation) => {
            runner.run(invocation, &task.workdir, &ctx).await?;
        }
    }

    workspace::collect_outputs(task)?;

    let found = task.outputs.iter().filter(|o| o.exists()).count();
    if found < task.min_outputs {
        return Err(StarbashError::TooFewOutputs {
            task: task.name.clone(),
            expected: task.min_outputs,
            found,
        });
    }

    Ok(signature)
}

/// Fresh cancel flag for a run.
pub fn cancel_flag() -> CancelFlag {
    Arc::new(AtomicBool::new(false))
}

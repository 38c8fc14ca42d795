// src/graph/builder.rs

//! Expand stages × sessions into a cullable task DAG for one target.
//!
//! Build order follows the pipeline steps; candidate tasks resolve their
//! inputs against the catalog (session frames, selected masters) and against
//! tasks created earlier in the build. Conflicting candidates (identical
//! output path) are culled by stage priority, and masters that nobody has yet
//! are backfilled by synthesizing master-generation tasks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::audit::{AuditRecord, RecipeAttribution, StageNote};
use crate::catalog::{ImageRecord, SessionRow};
use crate::context::ProcessingContext;
use crate::errors::{Result, StarbashError};
use crate::paths::Layout;
use crate::score::{MasterKind, ScoredCandidate, GRACE_HOURS};
use crate::stage::{guard_rejection, BoundStage, InputKind, OutputKind, RecipeMeta, StepDef};
use crate::types::{ImageKind, Multiplex, RepoKind};

use super::task::{MasterPublish, Task, TaskAction, TaskInput, ToolInvocation};

/// Everything the builder needs, prefetched so the build itself is pure.
pub struct BuildRequest<'a> {
    /// Normalized target name, or a job label like `masters`.
    pub target: String,
    /// Sessions to multiplex stages over.
    pub sessions: Vec<SessionRow>,
    /// Calibration sessions available for master backfill.
    pub calibration_sessions: Vec<SessionRow>,
    /// Member frames for every session above, keyed by session id.
    pub session_frames: HashMap<i64, Vec<ImageRecord>>,
    /// Ranked master candidates per (session id, master kind).
    pub master_candidates: HashMap<(i64, MasterKind), Vec<ScoredCandidate>>,
    pub steps: Vec<StepDef>,
    pub stages: Vec<BoundStage>,
    pub recipe: RecipeMeta,
    pub layout: &'a Layout,
    /// Hard timeout for tool invocations without a per-stage override.
    pub default_timeout_s: u64,
}

/// The built graph plus its audit trail.
pub struct BuiltGraph {
    pub tasks: BTreeMap<String, Task>,
    pub audit: AuditRecord,
}

struct Builder<'a> {
    req: &'a BuildRequest<'a>,
    tasks: Vec<Task>,
    names: BTreeSet<String>,
    audit: AuditRecord,
    target_filters: BTreeSet<String>,
    /// (stage long name, session id) pairs already backfilled.
    backfilled: BTreeSet<(String, i64)>,
}

/// Build the task graph for one target (or one masters run).
pub fn build(req: &BuildRequest<'_>) -> Result<BuiltGraph> {
    let mut audit = AuditRecord::new(&req.target);
    audit.recipe = Some(RecipeAttribution {
        name: req.recipe.name.clone(),
        author: req.recipe.author.clone(),
    });

    let target_filters: BTreeSet<String> = req
        .sessions
        .iter()
        .map(|s| s.filter.clone())
        .filter(|f| !f.is_empty())
        .collect();

    let mut builder = Builder {
        req,
        tasks: Vec::new(),
        names: BTreeSet::new(),
        audit,
        target_filters,
        backfilled: BTreeSet::new(),
    };

    builder.instantiate_all()?;
    builder.cull();
    builder.sweep_unsatisfiable();
    let tasks = builder.wire_dependencies();
    super::validate::validate(&tasks, &req.target)?;

    let mut audit = builder.audit;
    record_used_stages(&tasks, &mut audit);
    if tasks.is_empty() {
        // Surface the most useful build note (typically an unavailable
        // master) in the error, since no audit record will be written.
        let detail = audit
            .notes
            .iter()
            .find(|n| n.contains("unavailable-master"))
            .or_else(|| audit.notes.first());
        let label = match detail {
            Some(note) => format!("{} ({note})", req.target),
            None => req.target.clone(),
        };
        return Err(StarbashError::NoEligibleStage(label));
    }

    info!(
        target = %req.target,
        tasks = tasks.len(),
        excluded = audit.stages_excluded.len(),
        "task graph built"
    );
    Ok(BuiltGraph { tasks, audit })
}

fn record_used_stages(tasks: &BTreeMap<String, Task>, audit: &mut AuditRecord) {
    let mut seen = BTreeSet::new();
    for task in tasks.values() {
        if seen.insert(task.stage_name.clone()) {
            audit.stages_used.push(StageNote {
                name: task.stage_name.clone(),
                note: None,
            });
        }
    }
}

impl<'a> Builder<'a> {
    fn instantiate_all(&mut self) -> Result<()> {
        // Steps run in priority order; stages keep their load order inside a
        // step so repository precedence stays meaningful.
        let steps = self.req.steps.clone();
        for step in &steps {
            let stages: Vec<BoundStage> = self
                .req
                .stages
                .iter()
                .filter(|s| s.def.when == step.name)
                .cloned()
                .collect();
            for stage in &stages {
                match stage.def.effective_multiplex() {
                    Multiplex::PerSession => {
                        let sessions = self.req.sessions.clone();
                        for session in &sessions {
                            self.try_candidate(stage, Some(session))?;
                        }
                    }
                    Multiplex::PerTarget | Multiplex::Single => {
                        self.try_candidate(stage, None)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn base_context(&self) -> ProcessingContext {
        let layout = self.req.layout;
        let mut ctx = ProcessingContext::new();
        ctx.set("target", self.req.target.clone());
        ctx.set(
            "process_dir",
            layout
                .processing_dir()
                .join(&self.req.target)
                .display()
                .to_string(),
        );
        ctx.set(
            "output_dir",
            layout.processed_dir(&self.req.target).display().to_string(),
        );
        ctx.set("masters_root", layout.masters_dir().display().to_string());
        ctx
    }

    fn session_context(&self, ctx: &mut ProcessingContext, session: &SessionRow) {
        ctx.set("session", session.id.to_string());
        ctx.set("imagetyp", session.kind.as_str());
        ctx.set("filter", session.filter.clone());
        ctx.set("gain", session.gain.to_string());
        ctx.set("exposure", format!("{}", session.exposure_s as i64));
        ctx.set("camera_id", session.camera_id.clone());
        ctx.set("instrument", session.instrument.clone());
        ctx.set("date", session.night.clone());
        ctx.set("session_config", session.config_label());
    }

    fn unique_name(&mut self, base: &str) -> String {
        if self.names.insert(base.to_string()) {
            return base.to_string();
        }
        let mut index = 2;
        loop {
            let candidate = format!("{base}_{index}");
            if self.names.insert(candidate.clone()) {
                return candidate;
            }
            index += 1;
        }
    }

    /// Try to instantiate one candidate task. Returns the task name when a
    /// candidate was created; quiet skips (failed guards, empty sessions) are
    /// normal and only logged.
    fn try_candidate(
        &mut self,
        stage: &BoundStage,
        session: Option<&SessionRow>,
    ) -> Result<Option<String>> {
        if stage.def.tool_kind().is_none() {
            return Err(StarbashError::UnknownToolKind(stage.def.tool.name.clone()));
        }
        if let Some(reason) = guard_rejection(&stage.def, session, &self.target_filters) {
            debug!(stage = %stage.def.name, reason, "stage not eligible");
            return Ok(None);
        }

        let mut ctx = self.base_context();
        if let Some(session) = session {
            self.session_context(&mut ctx, session);
        }
        for (key, value) in &stage.def.context {
            ctx.set_toml(key.clone(), value);
        }
        for (key, param) in &stage.def.parameters {
            ctx.set_toml(key.clone(), &param.default);
            self.audit.parameters.insert(
                format!("{}.{key}", stage.def.name),
                toml_scalar(&param.default),
            );
        }

        let base_name = match session {
            Some(session) => format!("{}_{}_s{}", stage.def.name, self.req.target, session.id),
            None => format!("{}_{}", stage.def.name, self.req.target),
        };
        let name = self.unique_name(&base_name);
        let workdir = self
            .req
            .layout
            .processing_dir()
            .join(&self.req.target)
            .join(&name);

        // --- inputs ---
        let mut inputs: Vec<TaskInput> = Vec::new();
        for input in &stage.def.inputs {
            match input.kind {
                InputKind::Session => {
                    let Some(session) = session else {
                        debug!(stage = %stage.def.name, "session input without a session");
                        self.names.remove(&name);
                        return Ok(None);
                    };
                    let mut frames = self
                        .req
                        .session_frames
                        .get(&session.id)
                        .cloned()
                        .unwrap_or_default();
                    // An input type restricts which frames qualify, so a
                    // light-only stage never fires for calibration sessions.
                    if let Some(wanted) = input
                        .type_
                        .as_deref()
                        .and_then(|t| t.parse::<ImageKind>().ok())
                    {
                        frames.retain(|f| f.kind.raw_counterpart() == wanted.raw_counterpart());
                    }
                    let needed = input.min_count.max(1);
                    if frames.len() < needed {
                        debug!(
                            stage = %stage.def.name,
                            session = session.id,
                            frames = frames.len(),
                            needed,
                            "not enough session frames"
                        );
                        self.names.remove(&name);
                        return Ok(None);
                    }
                    let base = format!("{}_s{}_", session.kind.as_str(), session.id);
                    let mut link_names = Vec::new();
                    for (index, frame) in frames.iter().enumerate() {
                        let link_name = format!("{base}{:05}.fits", index + 1);
                        link_names.push(link_name.clone());
                        inputs.push(TaskInput {
                            path: PathBuf::from(&frame.path),
                            link_name,
                        });
                    }
                    ctx.set("input_base", base);
                    ctx.set("input_files", link_names);
                }
                InputKind::Master => {
                    let kind = match input.type_.as_deref().and_then(MasterKind::parse) {
                        Some(kind) => kind,
                        None => {
                            return Err(StarbashError::Other(anyhow::anyhow!(
                                "stage '{}' master input needs a valid 'type'",
                                stage.def.name
                            )))
                        }
                    };
                    let Some(session) = session else {
                        debug!(stage = %stage.def.name, "master input without a session");
                        self.names.remove(&name);
                        return Ok(None);
                    };
                    match self.resolve_master(session, kind)? {
                        Some(path) => {
                            let link_name = file_name_of(&path);
                            ctx.set(format!("master_{kind}"), link_name.clone());
                            ctx.set(
                                format!("master_{kind}_arg"),
                                format!("-{kind}={link_name}"),
                            );
                            inputs.push(TaskInput { path, link_name });
                        }
                        None if input.required => {
                            let note = format!(
                                "unavailable-master: no {kind} for session s{} of '{}', stage '{}' not selectable",
                                session.id, self.req.target, stage.def.name
                            );
                            warn!("{note}");
                            self.audit.notes.push(note);
                            self.names.remove(&name);
                            return Ok(None);
                        }
                        None => {
                            ctx.set(format!("master_{kind}_arg"), "");
                        }
                    }
                }
                InputKind::Stage => {
                    let Some(upstream_name) = input.name.as_deref() else {
                        return Err(StarbashError::Other(anyhow::anyhow!(
                            "stage '{}' stage input needs a 'name'",
                            stage.def.name
                        )));
                    };
                    let outputs = self.upstream_outputs(upstream_name, session);
                    if outputs.is_empty() && input.required {
                        debug!(
                            stage = %stage.def.name,
                            upstream = upstream_name,
                            "no upstream outputs, skipping candidate"
                        );
                        self.names.remove(&name);
                        return Ok(None);
                    }
                    for path in outputs {
                        let link_name = file_name_of(&path);
                        inputs.push(TaskInput { path, link_name });
                    }
                }
                InputKind::Glob => {
                    let Some(pattern) = input.pattern.as_deref() else {
                        return Err(StarbashError::Other(anyhow::anyhow!(
                            "stage '{}' glob input needs a 'pattern'",
                            stage.def.name
                        )));
                    };
                    let pattern = ctx.expand(pattern)?;
                    let matches = self.glob_matches(&pattern)?;
                    if matches.is_empty() && input.required {
                        debug!(
                            stage = %stage.def.name,
                            pattern,
                            "glob matched nothing, skipping candidate"
                        );
                        self.names.remove(&name);
                        return Ok(None);
                    }
                    for path in matches {
                        let link_name = file_name_of(&path);
                        inputs.push(TaskInput { path, link_name });
                    }
                }
                InputKind::Files => {
                    for template in &input.files {
                        let path = PathBuf::from(ctx.expand(template)?);
                        let produced = self
                            .tasks
                            .iter()
                            .any(|t| t.outputs.iter().any(|o| o == &path));
                        if !produced && !path.exists() && input.required {
                            return Err(StarbashError::MissingInputs {
                                target: self.req.target.clone(),
                                inputs: vec![path.display().to_string()],
                            });
                        }
                        let link_name = file_name_of(&path);
                        inputs.push(TaskInput { path, link_name });
                    }
                }
            }
        }

        if let Some(first) = inputs.first() {
            ctx.set("input_first", first.link_name.clone());
        }

        // --- outputs ---
        let mut outputs = Vec::new();
        for template in &stage.def.output {
            let expanded = ctx.expand(template)?;
            let path = PathBuf::from(&expanded);
            let path = if path.is_absolute() {
                path
            } else {
                self.output_base(stage.def.output_kind).join(path)
            };
            outputs.push(path);
        }
        if let Some(first) = outputs.first() {
            ctx.set("output_first", first.display().to_string());
        }

        // --- command ---
        let action = self.build_action(stage, &ctx)?;

        let publish_master = match (stage.def.output_kind, session) {
            (OutputKind::Master, Some(session)) => {
                outputs.first().map(|path| MasterPublish {
                    record: master_record(session, path, self.req.layout),
                })
            }
            _ => None,
        };

        let lenient_inputs = stage
            .def
            .inputs
            .iter()
            .any(|i| i.kind == InputKind::Glob);

        let task = Task {
            name: name.clone(),
            stage_name: stage.def.name.clone(),
            stage_long_name: stage.long_name(),
            target: self.req.target.clone(),
            session_ids: session.map(|s| vec![s.id]).unwrap_or_default(),
            inputs,
            outputs,
            action,
            workdir,
            deps: BTreeSet::new(),
            min_outputs: stage.def.min_outputs,
            priority: stage.def.priority,
            lenient_inputs,
            context: ctx,
            publish_master,
        };
        debug!(task = %task.name, stage = %task.stage_name, "candidate task created");
        self.tasks.push(task);
        Ok(Some(name))
    }

    fn output_base(&self, kind: OutputKind) -> PathBuf {
        match kind {
            OutputKind::Work => self.req.layout.processing_dir().join(&self.req.target),
            OutputKind::Processed => self.req.layout.processed_dir(&self.req.target),
            OutputKind::Master => self.req.layout.masters_dir(),
        }
    }

    fn build_action(&self, stage: &BoundStage, ctx: &ProcessingContext) -> Result<TaskAction> {
        let kind = stage
            .def
            .tool_kind()
            .ok_or_else(|| StarbashError::UnknownToolKind(stage.def.tool.name.clone()))?;

        let script = match (&stage.def.script, &stage.def.script_file) {
            (Some(script), _) => script.clone(),
            (None, Some(file)) => stage
                .repo
                .read_file(file, &self.req.layout.remote_cache_dir())?,
            (None, None) => String::new(),
        };
        let command = ctx.expand(&script)?;
        let mut args = Vec::with_capacity(stage.def.tool.args.len());
        for template in &stage.def.tool.args {
            args.push(ctx.expand(template)?);
        }
        let timeout_s = stage
            .def
            .tool
            .timeout
            .map(|t| t.max(1.0) as u64)
            .unwrap_or(self.req.default_timeout_s);

        Ok(TaskAction::Tool(ToolInvocation {
            kind,
            command,
            args,
            timeout_s,
        }))
    }

    /// Outputs of earlier candidates matching a stage name or `when` slot,
    /// restricted to the current session for per-session consumers.
    fn upstream_outputs(&self, upstream: &str, session: Option<&SessionRow>) -> Vec<PathBuf> {
        let mut outputs = Vec::new();
        let mut seen = BTreeSet::new();
        for task in &self.tasks {
            let matches = task.stage_name == upstream
                || self
                    .req
                    .stages
                    .iter()
                    .any(|s| s.def.name == task.stage_name && s.def.when == upstream);
            if !matches {
                continue;
            }
            if let Some(session) = session {
                if !task.session_ids.is_empty() && !task.session_ids.contains(&session.id) {
                    continue;
                }
            }
            for output in &task.outputs {
                if seen.insert(output.clone()) {
                    outputs.push(output.clone());
                }
            }
        }
        outputs
    }

    /// Paths matching an expanded glob: declared outputs of earlier
    /// candidates plus files already on disk.
    fn glob_matches(&self, pattern: &str) -> Result<Vec<PathBuf>> {
        let glob = globset::Glob::new(pattern)
            .map_err(|e| StarbashError::Other(e.into()))?
            .compile_matcher();

        let mut seen = BTreeSet::new();
        for task in &self.tasks {
            for output in &task.outputs {
                if glob.is_match(output) {
                    seen.insert(output.clone());
                }
            }
        }

        // On-disk matches: list the pattern's parent directory (patterns are
        // single-directory by construction).
        let pattern_path = Path::new(pattern);
        if let Some(parent) = pattern_path.parent() {
            if let Ok(entries) = std::fs::read_dir(parent) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if glob.is_match(&path) {
                        seen.insert(path);
                    }
                }
            }
        }
        Ok(seen.into_iter().collect())
    }

    /// A ranked master from the catalog, or a backfilled generation task's
    /// output. `None` when neither exists.
    fn resolve_master(
        &mut self,
        session: &SessionRow,
        kind: MasterKind,
    ) -> Result<Option<PathBuf>> {
        if let Some(ranked) = self
            .req
            .master_candidates
            .get(&(session.id, kind))
            .filter(|r| !r.is_empty())
        {
            self.audit
                .record_master_choice(session.id, kind.as_str(), ranked);
            return Ok(Some(PathBuf::from(&ranked[0].record.path)));
        }
        self.backfill_master(session, kind)
    }

    /// Synthesize a master-generation task from raw calibration sessions.
    fn backfill_master(
        &mut self,
        session: &SessionRow,
        kind: MasterKind,
    ) -> Result<Option<PathBuf>> {
        let raw_kinds: &[ImageKind] = match kind {
            MasterKind::Flat => &[ImageKind::Flat],
            MasterKind::Dark => &[ImageKind::Dark],
            MasterKind::Bias => &[ImageKind::Bias],
            MasterKind::DarkOrBias => &[ImageKind::Dark, ImageKind::Bias],
        };

        for raw_kind in raw_kinds {
            let Some(cal_session) = self.matching_calibration_session(session, kind, *raw_kind)
            else {
                continue;
            };
            let Some(gen_stage) = self.generation_stage(*raw_kind) else {
                continue;
            };

            let key = (gen_stage.long_name(), cal_session.id);
            if self.backfilled.contains(&key) {
                // Already synthesized for another consumer; reuse its output.
                let existing = self
                    .tasks
                    .iter()
                    .find(|t| {
                        t.stage_long_name == key.0 && t.session_ids.contains(&cal_session.id)
                    })
                    .and_then(|t| t.outputs.first().cloned());
                return Ok(existing);
            }

            let created = self.try_candidate(&gen_stage, Some(&cal_session))?;
            let Some(task_name) = created else {
                continue;
            };
            self.backfilled.insert(key);

            // A single-frame calibration session collapses to a copy.
            let frame_count = self
                .req
                .session_frames
                .get(&cal_session.id)
                .map(|f| f.len())
                .unwrap_or(0);
            let task = self
                .tasks
                .iter_mut()
                .rfind(|t| t.name == task_name)
                .expect("task just created");
            if frame_count == 1 {
                task.action = TaskAction::Copy;
            }
            let output = task.outputs.first().cloned();
            info!(
                session = session.id,
                master = %kind,
                task = %task_name,
                "backfilling missing master"
            );
            return Ok(output);
        }
        Ok(None)
    }

    fn matching_calibration_session(
        &self,
        light: &SessionRow,
        kind: MasterKind,
        raw_kind: ImageKind,
    ) -> Option<SessionRow> {
        let cutoff = light.start + chrono::Duration::hours(GRACE_HOURS);
        self.req
            .calibration_sessions
            .iter()
            .filter(|c| c.kind.raw_counterpart() == raw_kind)
            .filter(|c| c.width == light.width && c.height == light.height)
            .filter(|c| c.start <= cutoff)
            .filter(|c| match kind {
                MasterKind::Flat => {
                    c.instrument == light.instrument && c.filter == light.filter
                }
                _ => {
                    let camera_matches =
                        c.camera_id == light.camera_id && c.gain == light.gain
                            && c.binning == light.binning;
                    let exposure_ok = raw_kind != ImageKind::Dark
                        || dark_exposure_matches(c.exposure_s, light.exposure_s);
                    camera_matches && exposure_ok
                }
            })
            .max_by(|a, b| a.start.cmp(&b.start).then_with(|| a.id.cmp(&b.id)))
            .cloned()
    }

    fn generation_stage(&self, raw_kind: ImageKind) -> Option<BoundStage> {
        self.req
            .stages
            .iter()
            .rev()
            .find(|s| {
                s.def.output_kind == OutputKind::Master
                    && s.def
                        .requires
                        .as_ref()
                        .and_then(|r| r.kind.as_deref())
                        .and_then(|k| k.parse::<ImageKind>().ok())
                        .map(|k| k.raw_counterpart() == raw_kind)
                        .unwrap_or(false)
            })
            .cloned()
    }

    /// Resolve output conflicts: among tasks declaring the same output path,
    /// the highest stage priority survives; the rest are excluded with a
    /// reason in the audit record.
    fn cull(&mut self) {
        loop {
            let mut by_output: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
            for (index, task) in self.tasks.iter().enumerate() {
                for output in &task.outputs {
                    by_output.entry(output.clone()).or_default().push(index);
                }
            }

            let mut to_remove: BTreeSet<usize> = BTreeSet::new();
            for (output, producers) in by_output {
                if producers.len() < 2 {
                    continue;
                }
                let winner = *producers
                    .iter()
                    .max_by(|&&a, &&b| {
                        let ta = &self.tasks[a];
                        let tb = &self.tasks[b];
                        ta.priority
                            .cmp(&tb.priority)
                            .then_with(|| tb.name.cmp(&ta.name))
                    })
                    .expect("non-empty producers");
                for &index in &producers {
                    if index != winner {
                        let loser = &self.tasks[index];
                        let winner_task = &self.tasks[winner];
                        self.audit.stages_excluded.push(StageNote {
                            name: loser.stage_name.clone(),
                            note: Some(format!(
                                "output '{}' also produced by '{}' (priority {} > {})",
                                output.display(),
                                winner_task.stage_name,
                                winner_task.priority,
                                loser.priority,
                            )),
                        });
                        to_remove.insert(index);
                    }
                }
            }

            if to_remove.is_empty() {
                break;
            }
            let mut index = 0;
            self.tasks.retain(|_| {
                let keep = !to_remove.contains(&index);
                index += 1;
                keep
            });
        }
    }

    /// Drop tasks whose inputs are neither produced by a surviving task nor
    /// present on disk; removing one task can orphan another, so iterate to a
    /// fixed point.
    fn sweep_unsatisfiable(&mut self) {
        loop {
            let produced: BTreeSet<PathBuf> = self
                .tasks
                .iter()
                .flat_map(|t| t.outputs.iter().cloned())
                .collect();
            let unsatisfied: Vec<usize> = self
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, task)| {
                    task.input_paths()
                        .any(|input| !produced.contains(input) && !input.exists())
                })
                .map(|(index, _)| index)
                .collect();
            if unsatisfied.is_empty() {
                break;
            }
            for &index in unsatisfied.iter().rev() {
                let task = self.tasks.remove(index);
                let note = format!(
                    "task '{}' dropped: inputs unavailable after culling",
                    task.name
                );
                debug!("{note}");
                self.audit.notes.push(note);
            }
        }
    }

    /// Wire dependencies by path equality between outputs and inputs.
    fn wire_dependencies(&mut self) -> BTreeMap<String, Task> {
        let producers: BTreeMap<PathBuf, String> = self
            .tasks
            .iter()
            .flat_map(|t| t.outputs.iter().map(|o| (o.clone(), t.name.clone())))
            .collect();

        let mut tasks = BTreeMap::new();
        for mut task in std::mem::take(&mut self.tasks) {
            let inputs: Vec<PathBuf> = task.input_paths().cloned().collect();
            for input in inputs {
                if let Some(producer) = producers.get(&input) {
                    if producer != &task.name {
                        task.deps.insert(producer.clone());
                    }
                }
            }
            tasks.insert(task.name.clone(), task);
        }
        tasks
    }
}

fn dark_exposure_matches(candidate_s: f64, reference_s: f64) -> bool {
    if reference_s > 0.0 {
        (candidate_s - reference_s).abs() / reference_s <= 0.05
    } else {
        (candidate_s - reference_s).abs() <= f64::EPSILON
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn toml_scalar(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Catalog record for a master generated from a calibration session.
fn master_record(session: &SessionRow, output: &Path, layout: &Layout) -> ImageRecord {
    let kind = session
        .kind
        .master_counterpart()
        .unwrap_or(session.kind);
    ImageRecord {
        path: output.display().to_string(),
        repo_id: format!("file://{}", layout.masters_dir().display()),
        repo_kind: RepoKind::Master,
        kind,
        observed: session.start,
        exposure_s: session.exposure_s,
        gain: session.gain,
        binning: session.binning,
        filter: session.filter.clone(),
        target: String::new(),
        instrument: session.instrument.clone(),
        camera_id: session.camera_id.clone(),
        width: session.width,
        height: session.height,
        bayer: session.bayer.clone(),
        temperature: None,
        stack_count: session.frame_count.max(1),
        metadata: serde_json::Map::new(),
    }
}

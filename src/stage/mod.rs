// src/stage/mod.rs

//! Recipe/stage model: typed views over the `[[stage]]`, `stages` and
//! `[recipe]` declarations the repository layer collects.

pub mod guards;
pub mod model;

pub use guards::rejection as guard_rejection;
pub use model::{
    InputDef, InputKind, OutputKind, ParamDef, RecipeMeta, RequiresDef, StageDef, StepDef,
    ToolKind, ToolRef,
};

use std::sync::Arc;

use tracing::warn;

use crate::repo::{Repo, RepoManager};

/// A stage definition bound to the repository it came from, so script files
/// resolve against the right root.
#[derive(Debug, Clone)]
pub struct BoundStage {
    pub def: StageDef,
    pub repo: Arc<Repo>,
}

impl BoundStage {
    pub fn long_name(&self) -> String {
        self.def.long_name(&self.repo.url)
    }
}

/// Collect the pipeline steps (`stages` arrays) from all repositories,
/// ordered by priority (lower runs earlier). Last definition of a step name
/// wins its priority.
pub fn collect_steps(repos: &RepoManager) -> Vec<StepDef> {
    let mut steps: Vec<StepDef> = Vec::new();
    for item in repos.union("stages") {
        match item.value.clone().try_into::<StepDef>() {
            Ok(step) => {
                steps.retain(|s| s.name != step.name);
                steps.push(step);
            }
            Err(err) => warn!(
                repo = %item.repo.url,
                error = %err,
                "ignoring malformed stages entry"
            ),
        }
    }
    steps.sort_by_key(|s| s.priority);
    steps
}

/// Collect every `[[stage]]` declaration from all repositories, in load
/// order, each bound to its owning repository.
pub fn collect_stages(repos: &RepoManager) -> Vec<BoundStage> {
    let mut stages = Vec::new();
    for item in repos.union("stage") {
        match item.value.clone().try_into::<StageDef>() {
            Ok(def) => stages.push(BoundStage {
                def,
                repo: item.repo.clone(),
            }),
            Err(err) => warn!(
                repo = %item.repo.url,
                error = %err,
                "ignoring malformed [[stage]] entry"
            ),
        }
    }
    stages
}

/// Recipe attribution from the last repository that declares one.
pub fn recipe_meta(repos: &RepoManager) -> RecipeMeta {
    match repos.get("recipe") {
        Some((value, _)) => value.clone().try_into().unwrap_or_default(),
        None => RecipeMeta::default(),
    }
}

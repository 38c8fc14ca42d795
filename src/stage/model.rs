// src/stage/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;
use toml::Value;

use crate::types::Multiplex;

/// Tool kinds a stage may bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolKind {
    /// Siril-like stacking tool: script fed through stdin.
    Stacker,
    /// GraXpert-like image tool: explicit argument list.
    ImageTool,
    /// Restricted inline script.
    Script,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::Stacker => "stacker",
            ToolKind::ImageTool => "image-tool",
            ToolKind::Script => "script",
        }
    }

    pub fn parse(s: &str) -> Option<ToolKind> {
        match s.trim().to_lowercase().as_str() {
            "stacker" => Some(ToolKind::Stacker),
            "image-tool" | "imagetool" => Some(ToolKind::ImageTool),
            "script" => Some(ToolKind::Script),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `tool = { name = "stacker", timeout = 600, args = [...] }`
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRef {
    pub name: String,
    /// Per-stage hard timeout override, seconds.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Argument templates for argv-style tools.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Where a stage's outputs land.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputKind {
    /// The per-target work directory (intermediate files).
    #[default]
    Work,
    /// The target's processed documents directory.
    Processed,
    /// The masters tree (`masters/<camera-id>/<kind>/...`).
    Master,
}

/// What an input descriptor draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputKind {
    /// The frames of the session being processed.
    Session,
    /// A selected master calibration frame.
    Master,
    /// Outputs of an upstream stage (by stage name or `when` slot).
    Stage,
    /// Files matching a templated glob.
    Glob,
    /// An explicit templated file list.
    Files,
}

fn default_true() -> bool {
    true
}

/// One input descriptor of a stage.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct InputDef {
    pub kind: InputKind,
    /// Image/master kind for `session` and `master` inputs.
    #[serde(default, rename = "type")]
    pub type_: Option<String>,
    /// Upstream stage name for `stage` inputs.
    #[serde(default)]
    pub name: Option<String>,
    /// Templated glob for `glob` inputs.
    #[serde(default)]
    pub pattern: Option<String>,
    /// Templated paths for `files` inputs.
    #[serde(default)]
    pub files: Vec<String>,
    /// A missing required input disqualifies the candidate task; optional
    /// inputs just leave their context keys unset.
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub min_count: usize,
}

/// Guard predicates evaluated against the session (per-session stages) or
/// the target's session set (per-target stages).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RequiresDef {
    /// Sensor must (or must not) report a bayer pattern.
    #[serde(default)]
    pub bayer: Option<bool>,
    /// Session image kind (used by master-generation stages).
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub camera: Option<String>,
    /// All of these filters must be present.
    #[serde(default)]
    pub filters_all_of: Vec<String>,
    /// At least one of these filters must be present.
    #[serde(default)]
    pub filters_any_of: Vec<String>,
    /// None of these filters may be present.
    #[serde(default)]
    pub filters_none_of: Vec<String>,
    #[serde(default)]
    pub min_frames: i64,
}

/// A named knob with default and doc string.
#[derive(Debug, Clone, Deserialize)]
pub struct ParamDef {
    pub default: Value,
    #[serde(default)]
    pub doc: Option<String>,
}

fn default_min_outputs() -> usize {
    1
}

/// One `[[stage]]` declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StageDef {
    pub name: String,
    /// Pipeline step this stage belongs to (see the `stages` ordering array).
    pub when: String,
    /// Culling tie-break among stages producing the same outputs.
    #[serde(default)]
    pub priority: i64,
    pub tool: ToolRef,
    #[serde(default)]
    pub script: Option<String>,
    /// Script file resolved against the owning repository's root.
    #[serde(default)]
    pub script_file: Option<String>,
    #[serde(default, rename = "input")]
    pub inputs: Vec<InputDef>,
    /// Templated output file names.
    #[serde(default)]
    pub output: Vec<String>,
    #[serde(default)]
    pub output_kind: OutputKind,
    /// Key/value overlay applied to the processing context.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    #[serde(default)]
    pub requires: Option<RequiresDef>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamDef>,
    #[serde(default = "default_min_outputs")]
    pub min_outputs: usize,
    #[serde(default)]
    pub multiplex: Option<Multiplex>,
    #[serde(default)]
    pub disabled: bool,
}

impl StageDef {
    /// Stable long name: owning repo URL + local name.
    pub fn long_name(&self, repo_url: &str) -> String {
        format!("{repo_url}#{}", self.name)
    }

    /// Effective multiplexing: explicit wins; otherwise per-session iff any
    /// input is per-session, per-target otherwise.
    pub fn effective_multiplex(&self) -> Multiplex {
        if let Some(multiplex) = self.multiplex {
            return multiplex;
        }
        if self.inputs.iter().any(|i| i.kind == InputKind::Session) {
            Multiplex::PerSession
        } else {
            Multiplex::PerTarget
        }
    }

    pub fn tool_kind(&self) -> Option<ToolKind> {
        ToolKind::parse(&self.tool.name)
    }
}

/// `[recipe]` metadata, for provenance/attribution in the audit record.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecipeMeta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

/// One entry of the `stages` ordering array: `{ name, priority }`.
#[derive(Debug, Clone, Deserialize)]
pub struct StepDef {
    pub name: String,
    pub priority: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_deserializes_from_toml() {
        let text = r#"
            name = "light_calibrated"
            when = "session.lights"
            priority = 30
            tool = { name = "stacker", timeout = 120 }
            script = "stack {input_base}"
            output = ["{process_dir}/cal_s{session}.fits"]
            min-outputs = 1

            [[input]]
            kind = "session"
            type = "light"
            min-count = 3

            [[input]]
            kind = "master"
            type = "darkorbias"

            [requires]
            bayer = true
        "#;
        let stage: StageDef = toml::from_str(text).unwrap();
        assert_eq!(stage.name, "light_calibrated");
        assert_eq!(stage.priority, 30);
        assert_eq!(stage.tool.timeout, Some(120.0));
        assert_eq!(stage.inputs.len(), 2);
        assert_eq!(stage.inputs[0].min_count, 3);
        assert!(stage.inputs[1].required);
        assert_eq!(stage.requires.as_ref().unwrap().bayer, Some(true));
        assert_eq!(stage.effective_multiplex(), Multiplex::PerSession);
        assert_eq!(stage.tool_kind(), Some(ToolKind::Stacker));
    }

    #[test]
    fn multiplex_defaults_to_per_target_without_session_inputs() {
        let text = r#"
            name = "stack"
            when = "final.stack"
            tool = { name = "stacker" }
            script = "stack"

            [[input]]
            kind = "glob"
            pattern = "{process_dir}/cal_*.fits"
        "#;
        let stage: StageDef = toml::from_str(text).unwrap();
        assert_eq!(stage.effective_multiplex(), Multiplex::PerTarget);
        assert_eq!(stage.min_outputs, 1);
    }

    #[test]
    fn long_name_includes_repo_url() {
        let text = r#"
            name = "stack"
            when = "final.stack"
            tool = { name = "stacker" }
        "#;
        let stage: StageDef = toml::from_str(text).unwrap();
        assert_eq!(
            stage.long_name("file:///recipes/osc"),
            "file:///recipes/osc#stack"
        );
    }

    #[test]
    fn builtin_defaults_stages_all_deserialize() {
        let doc: toml::value::Table = toml::from_str(crate::builtin::DEFAULTS).unwrap();
        for value in doc["stage"].as_array().unwrap() {
            let stage: StageDef = value.clone().try_into().unwrap();
            assert!(stage.tool_kind().is_some(), "stage {}", stage.name);
        }
        let steps: Vec<StepDef> = doc["stages"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.clone().try_into().unwrap())
            .collect();
        assert_eq!(steps.len(), 4);
    }
}

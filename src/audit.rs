// src/audit.rs

//! Per-target audit record: which stages ran, which masters were chosen (and
//! what else was considered), parameter values, tool versions.
//!
//! Written as TOML alongside the processed images so a user can always answer
//! "why does this stack look like this" without re-running anything.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::score::ScoredCandidate;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RecipeAttribution {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageNote {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CandidateNote {
    pub path: String,
    pub score: f64,
    pub rationale: String,
}

impl From<&ScoredCandidate> for CandidateNote {
    fn from(scored: &ScoredCandidate) -> Self {
        Self {
            path: scored.record.path.clone(),
            score: (scored.score * 10.0).round() / 10.0,
            rationale: scored.rationale.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MasterChoice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<String>,
    #[serde(default)]
    pub candidates: Vec<CandidateNote>,
}

/// The audit record for one processed target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub target: String,
    #[serde(default)]
    pub generated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<RecipeAttribution>,
    #[serde(default)]
    pub stages_used: Vec<StageNote>,
    #[serde(default)]
    pub stages_excluded: Vec<StageNote>,
    /// Keyed by `s<session-id>.<master-kind>`.
    #[serde(default)]
    pub masters: BTreeMap<String, MasterChoice>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub tool_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl AuditRecord {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            generated: chrono::Utc::now().to_rfc3339(),
            ..Default::default()
        }
    }

    pub fn record_master_choice(
        &mut self,
        session_id: i64,
        kind: &str,
        ranked: &[ScoredCandidate],
    ) {
        let choice = MasterChoice {
            selected: ranked.first().map(|c| c.record.path.clone()),
            candidates: ranked.iter().map(CandidateNote::from).collect(),
        };
        self.masters.insert(format!("s{session_id}.{kind}"), choice);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)
            .map_err(|e| crate::errors::StarbashError::Other(e.into()))?;
        std::fs::write(path, text)?;
        debug!(path = %path.display(), "audit record written");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audit_round_trips_through_toml() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ngc281.audit.toml");

        let mut audit = AuditRecord::new("ngc281");
        audit.stages_used.push(StageNote {
            name: "stack_duo".into(),
            note: None,
        });
        audit.stages_excluded.push(StageNote {
            name: "light_no_darks".into(),
            note: Some("lower priority than light_calibrated".into()),
        });
        audit.masters.insert(
            "s3.bias".into(),
            MasterChoice {
                selected: Some("/masters/bias.fits".into()),
                candidates: vec![CandidateNote {
                    path: "/masters/bias.fits".into(),
                    score: 98.0,
                    rationale: "same night, gain match".into(),
                }],
            },
        );
        audit.parameters.insert("smoothing".into(), "0.5".into());
        audit.save(&path).unwrap();

        let loaded = AuditRecord::load(&path).unwrap();
        assert_eq!(loaded, audit);
    }
}

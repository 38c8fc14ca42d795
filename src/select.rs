// src/select.rs

//! Persistent selection state: which targets/instruments/filters/kinds/dates
//! the driver has restricted the engine to.
//!
//! Dimensions are independent: AND across dimensions, OR within one. An empty
//! selection matches the universe. State round-trips through a JSON file so
//! it survives between driver invocations.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::ImageKind;

/// Predicate set consumed by catalog queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryConditions {
    pub targets: Vec<String>,
    pub instruments: Vec<String>,
    pub filters: Vec<String>,
    pub kinds: Vec<ImageKind>,
    /// Inclusive lower bound on session start.
    pub after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on session start.
    pub before: Option<DateTime<Utc>>,
}

impl QueryConditions {
    pub fn matches_session(
        &self,
        target: &str,
        instrument: &str,
        filter: &str,
        kind: ImageKind,
        start: DateTime<Utc>,
    ) -> bool {
        if !self.targets.is_empty() && !self.targets.iter().any(|t| t == target) {
            return false;
        }
        if !self.instruments.is_empty() && !self.instruments.iter().any(|i| i == instrument) {
            return false;
        }
        if !self.filters.is_empty() && !self.filters.iter().any(|f| f == filter) {
            return false;
        }
        if !self.kinds.is_empty() && !self.kinds.contains(&kind) {
            return false;
        }
        if let Some(after) = self.after {
            if start < after {
                return false;
            }
        }
        if let Some(before) = self.before {
            if start > before {
                return false;
            }
        }
        true
    }
}

/// Serialized shape of the selection file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
struct SelectionState {
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    instruments: Vec<String>,
    #[serde(default)]
    filters: Vec<String>,
    #[serde(default)]
    kinds: Vec<ImageKind>,
    #[serde(default)]
    date_after: Option<String>,
    #[serde(default)]
    date_before: Option<String>,
}

/// The current selection, backed by a JSON state file.
#[derive(Debug)]
pub struct Selection {
    state_file: PathBuf,
    state: SelectionState,
}

impl Selection {
    /// Load the selection from its state file, or start empty.
    pub fn load(state_file: &Path) -> Self {
        let state = match std::fs::read_to_string(state_file) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(state) => state,
                Err(err) => {
                    warn!(error = %err, "ignoring unreadable selection state");
                    SelectionState::default()
                }
            },
            Err(_) => SelectionState::default(),
        };
        Self {
            state_file: state_file.to_path_buf(),
            state,
        }
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.state)?;
        std::fs::write(&self.state_file, contents)?;
        debug!(path = %self.state_file.display(), "selection state saved");
        Ok(())
    }

    /// True when no criteria are active (selecting everything).
    pub fn is_empty(&self) -> bool {
        self.state == SelectionState::default()
    }

    /// Drop all criteria.
    pub fn clear(&mut self) -> Result<()> {
        self.state = SelectionState::default();
        self.save()
    }

    pub fn add_target(&mut self, target: String) -> Result<()> {
        if !self.state.targets.contains(&target) {
            self.state.targets.push(target);
        }
        self.save()
    }

    pub fn remove_target(&mut self, target: &str) -> Result<()> {
        self.state.targets.retain(|t| t != target);
        self.save()
    }

    pub fn add_instrument(&mut self, instrument: String) -> Result<()> {
        if !self.state.instruments.contains(&instrument) {
            self.state.instruments.push(instrument);
        }
        self.save()
    }

    pub fn add_filter(&mut self, filter: String) -> Result<()> {
        if !self.state.filters.contains(&filter) {
            self.state.filters.push(filter);
        }
        self.save()
    }

    pub fn add_kind(&mut self, kind: ImageKind) -> Result<()> {
        if !self.state.kinds.contains(&kind) {
            self.state.kinds.push(kind);
        }
        self.save()
    }

    /// Restrict to sessions at or after the given instant.
    pub fn set_after(&mut self, after: Option<DateTime<Utc>>) -> Result<()> {
        self.state.date_after = after.map(|d| d.to_rfc3339());
        self.save()
    }

    /// Restrict to sessions at or before the given instant.
    pub fn set_before(&mut self, before: Option<DateTime<Utc>>) -> Result<()> {
        self.state.date_before = before.map(|d| d.to_rfc3339());
        self.save()
    }

    /// Restrict to an inclusive date window.
    pub fn set_between(
        &mut self,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Result<()> {
        self.state.date_after = Some(after.to_rfc3339());
        self.state.date_before = Some(before.to_rfc3339());
        self.save()
    }

    pub fn targets(&self) -> &[String] {
        &self.state.targets
    }

    /// Build the predicate set consumed by the catalog.
    pub fn to_query_conditions(&self) -> QueryConditions {
        QueryConditions {
            targets: self.state.targets.clone(),
            instruments: self.state.instruments.clone(),
            filters: self.state.filters.clone(),
            kinds: self.state.kinds.clone(),
            after: self
                .state
                .date_after
                .as_deref()
                .and_then(crate::catalog::parse_instant),
            before: self
                .state
                .date_before
                .as_deref()
                .and_then(crate::catalog::parse_instant),
        }
    }

    /// One-line summary for logs and the `info` surface.
    pub fn summary(&self) -> String {
        if self.is_empty() {
            return "all sessions (no filters active)".to_string();
        }
        let mut parts = Vec::new();
        if !self.state.targets.is_empty() {
            parts.push(format!("targets: {}", self.state.targets.join(", ")));
        }
        if !self.state.instruments.is_empty() {
            parts.push(format!("instruments: {}", self.state.instruments.join(", ")));
        }
        if !self.state.filters.is_empty() {
            parts.push(format!("filters: {}", self.state.filters.join(", ")));
        }
        if !self.state.kinds.is_empty() {
            let kinds: Vec<&str> = self.state.kinds.iter().map(|k| k.as_str()).collect();
            parts.push(format!("kinds: {}", kinds.join(", ")));
        }
        match (&self.state.date_after, &self.state.date_before) {
            (Some(a), Some(b)) => parts.push(format!("between {a} and {b}")),
            (Some(a), None) => parts.push(format!("after {a}")),
            (None, Some(b)) => parts.push(format!("before {b}")),
            (None, None) => {}
        }
        parts.join("; ")
    }
}

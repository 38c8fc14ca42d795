// src/stage/guards.rs

//! Static guard evaluation: does a stage apply to this session/target?
//!
//! This is the build-time phase; output-inspection guards run again just
//! before dispatch in the executor (`skipped-guard`).

use std::collections::BTreeSet;

use crate::catalog::SessionRow;
use crate::types::{ImageKind, Multiplex};

use super::model::StageDef;

/// Evaluate a stage's guards against a session (per-session stages) or the
/// target's filter set (per-target stages).
///
/// Returns `None` when the stage is eligible, otherwise the rejection reason.
pub fn rejection(
    stage: &StageDef,
    session: Option<&SessionRow>,
    target_filters: &BTreeSet<String>,
) -> Option<String> {
    if stage.disabled {
        return Some("stage is disabled".to_string());
    }
    let Some(requires) = &stage.requires else {
        return None;
    };

    if let Some(wanted_kind) = &requires.kind {
        match (wanted_kind.parse::<ImageKind>(), session) {
            (Ok(kind), Some(session)) => {
                if session.kind.raw_counterpart() != kind.raw_counterpart() {
                    return Some(format!(
                        "session kind {} does not match required {kind}",
                        session.kind
                    ));
                }
            }
            (Ok(_), None) => return Some("kind guard needs a session".to_string()),
            (Err(reason), _) => return Some(reason),
        }
    }

    if let Some(wants_bayer) = requires.bayer {
        let Some(session) = session else {
            return Some("bayer guard needs a session".to_string());
        };
        let has_bayer = session.bayer.is_some();
        if has_bayer != wants_bayer {
            return Some(format!(
                "bayer pattern {} but stage requires {}",
                if has_bayer { "present" } else { "absent" },
                if wants_bayer { "present" } else { "absent" },
            ));
        }
    }

    if let Some(instrument) = &requires.instrument {
        let Some(session) = session else {
            return Some("instrument guard needs a session".to_string());
        };
        if &session.instrument != instrument {
            return Some(format!(
                "instrument '{}' != required '{instrument}'",
                session.instrument
            ));
        }
    }

    if let Some(camera) = &requires.camera {
        let Some(session) = session else {
            return Some("camera guard needs a session".to_string());
        };
        if &session.camera_id != camera {
            return Some(format!(
                "camera '{}' != required '{camera}'",
                session.camera_id
            ));
        }
    }

    if requires.min_frames > 0 {
        if let Some(session) = session {
            if session.frame_count < requires.min_frames {
                return Some(format!(
                    "{} frames < required {}",
                    session.frame_count, requires.min_frames
                ));
            }
        }
    }

    // Filter-set guards: a per-session stage sees only its own session's
    // filter; a per-target stage sees every filter the target was shot with.
    let filters: BTreeSet<String> = match (stage.effective_multiplex(), session) {
        (Multiplex::PerSession, Some(session)) => {
            [session.filter.clone()].into_iter().collect()
        }
        _ => target_filters.clone(),
    };

    for wanted in &requires.filters_all_of {
        if !filters.contains(wanted) {
            return Some(format!("filter '{wanted}' not present"));
        }
    }
    if !requires.filters_any_of.is_empty()
        && !requires.filters_any_of.iter().any(|f| filters.contains(f))
    {
        return Some(format!(
            "none of the filters {:?} present",
            requires.filters_any_of
        ));
    }
    for unwanted in &requires.filters_none_of {
        if filters.contains(unwanted) {
            return Some(format!("filter '{unwanted}' present but excluded"));
        }
    }

    None
}

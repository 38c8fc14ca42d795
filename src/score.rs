// src/score.rs

//! Calibration-frame selection: score-rank master candidates for one light
//! session.
//!
//! Hard filters reject outright (wrong geometry, wrong camera, too far in the
//! future); everything surviving gets a score plus a human-readable rationale
//! that ends up in the per-target audit record. Ordering is fully
//! deterministic so reruns pick the same masters.

use chrono::Duration;

use crate::catalog::{ImageRecord, SessionRow};
use crate::types::ImageKind;

/// Master kinds a light session may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MasterKind {
    Flat,
    Dark,
    Bias,
    /// A bias may substitute for a dark: dark tolerances minus the exposure
    /// check.
    DarkOrBias,
}

impl MasterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasterKind::Flat => "flat",
            MasterKind::Dark => "dark",
            MasterKind::Bias => "bias",
            MasterKind::DarkOrBias => "darkorbias",
        }
    }

    /// Image kinds acceptable as candidates.
    pub fn accepted_kinds(&self) -> &'static [ImageKind] {
        match self {
            MasterKind::Flat => &[ImageKind::MasterFlat],
            MasterKind::Dark => &[ImageKind::MasterDark],
            MasterKind::Bias => &[ImageKind::MasterBias],
            MasterKind::DarkOrBias => &[ImageKind::MasterDark, ImageKind::MasterBias],
        }
    }

    pub fn parse(s: &str) -> Option<MasterKind> {
        match s.trim().to_lowercase().as_str() {
            "flat" => Some(MasterKind::Flat),
            "dark" => Some(MasterKind::Dark),
            "bias" => Some(MasterKind::Bias),
            "darkorbias" | "dark-or-bias" => Some(MasterKind::DarkOrBias),
            _ => None,
        }
    }
}

impl std::fmt::Display for MasterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate that survived hard filtering, with its score and rationale.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub record: ImageRecord,
    pub score: f64,
    pub rationale: String,
}

/// Grace window: a master taken up to this long after the lights is still
/// acceptable (same-night calibration shot after imaging).
pub const GRACE_HOURS: i64 = 24;

const PAST_BONUS: f64 = 100.0;
const GRACE_BONUS: f64 = 40.0;
const AGE_PENALTY_PER_DAY: f64 = 2.0;
const AGE_PENALTY_CLAMP: f64 = 50.0;
const STACKED_BONUS: f64 = 25.0;
const TEMP_BONUS: f64 = 20.0;
const DARK_EXPOSURE_TOLERANCE: f64 = 0.05;

/// Check a candidate against the hard filters for the given master kind.
///
/// Returns `None` when the candidate passes, otherwise the rejection reason.
pub fn hard_filter_rejection(
    session: &SessionRow,
    kind: MasterKind,
    candidate: &ImageRecord,
) -> Option<String> {
    if !kind.accepted_kinds().contains(&candidate.kind) {
        return Some(format!("kind {} not usable as {kind}", candidate.kind));
    }
    if candidate.width != session.width || candidate.height != session.height {
        return Some(format!(
            "dimensions {}x{} != session {}x{}",
            candidate.width, candidate.height, session.width, session.height
        ));
    }

    match kind {
        MasterKind::Flat => {
            if candidate.instrument != session.instrument {
                return Some(format!(
                    "instrument '{}' != session '{}'",
                    candidate.instrument, session.instrument
                ));
            }
            if candidate.filter != session.filter {
                return Some(format!(
                    "filter '{}' != session '{}'",
                    candidate.filter, session.filter
                ));
            }
        }
        MasterKind::Dark | MasterKind::Bias | MasterKind::DarkOrBias => {
            if candidate.camera_id != session.camera_id {
                return Some(format!(
                    "camera '{}' != session '{}'",
                    candidate.camera_id, session.camera_id
                ));
            }
            if candidate.gain != session.gain {
                return Some(format!(
                    "gain {} != session {}",
                    candidate.gain, session.gain
                ));
            }
            if candidate.binning != session.binning {
                return Some(format!(
                    "binning {} != session {}",
                    candidate.binning, session.binning
                ));
            }
        }
    }

    // Exposure must track the lights for darks only; a bias standing in via
    // darkorbias skips the check.
    if kind == MasterKind::Dark
        || (kind == MasterKind::DarkOrBias && candidate.kind == ImageKind::MasterDark)
    {
        let reference = session.exposure_s;
        let delta = (candidate.exposure_s - reference).abs();
        let within = if reference > 0.0 {
            delta / reference <= DARK_EXPOSURE_TOLERANCE
        } else {
            delta <= f64::EPSILON
        };
        if !within {
            return Some(format!(
                "exposure {:.3}s outside \u{b1}5% of session {:.3}s",
                candidate.exposure_s, reference
            ));
        }
    }

    let cutoff = session.start + Duration::hours(GRACE_HOURS);
    if candidate.observed > cutoff {
        return Some(format!(
            "observed {} is past the grace window (cutoff {})",
            candidate.observed.to_rfc3339(),
            cutoff.to_rfc3339()
        ));
    }

    None
}

fn score_candidate(session: &SessionRow, candidate: &ImageRecord) -> (f64, String) {
    let mut score = 0.0;
    let mut reasons: Vec<String> = Vec::new();

    let delta = candidate.observed.signed_duration_since(session.start);
    if delta <= Duration::zero() {
        score += PAST_BONUS;
        let days = -delta.num_minutes() as f64 / (60.0 * 24.0);
        if days >= 0.05 {
            reasons.push(format!("{days:.1}d old"));
        } else {
            reasons.push("same night".to_string());
        }
    } else {
        // Inside the grace window (hard filters removed anything beyond it).
        score += GRACE_BONUS;
        reasons.push("in future".to_string());
    }

    let age_days = delta.num_minutes().abs() as f64 / (60.0 * 24.0);
    score -= (age_days * AGE_PENALTY_PER_DAY).min(AGE_PENALTY_CLAMP);

    if candidate.stack_count > 1 {
        score += STACKED_BONUS;
        reasons.push(format!("stack of {}", candidate.stack_count));
    }

    if candidate.gain == session.gain {
        reasons.push("gain match".to_string());
    }

    (score, reasons.join(", "))
}

/// Rank candidates for one light session and master kind.
///
/// Hard-filter failures are dropped; survivors are sorted best-first with a
/// deterministic tie-break (score, newer instant, stack count, path).
pub fn select_master(
    session: &SessionRow,
    kind: MasterKind,
    candidates: &[ImageRecord],
    reference_temperature: Option<f64>,
) -> Vec<ScoredCandidate> {
    let mut scored: Vec<ScoredCandidate> = candidates
        .iter()
        .filter(|c| hard_filter_rejection(session, kind, c).is_none())
        .map(|c| {
            let (mut score, mut rationale) = score_candidate(session, c);
            if let (Some(reference), Some(candidate_temp)) =
                (reference_temperature, c.temperature)
            {
                let temp_delta = (candidate_temp - reference).abs();
                score += TEMP_BONUS * (-temp_delta).exp();
                if temp_delta >= 1.0 {
                    if !rationale.is_empty() {
                        rationale.push_str(", ");
                    }
                    rationale.push_str(&format!("temp \u{394}={temp_delta:.1}"));
                }
            }
            ScoredCandidate {
                record: c.clone(),
                score,
                rationale,
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.record.observed.cmp(&a.record.observed))
            .then_with(|| b.record.stack_count.cmp(&a.record.stack_count))
            .then_with(|| a.record.path.cmp(&b.record.path))
    });

    scored
}

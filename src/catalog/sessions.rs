// src/catalog/sessions.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::{debug, warn};

use crate::errors::{Result, StarbashError};
use crate::select::QueryConditions;
use crate::types::ImageKind;

use super::images::parse_instant;
use super::{Catalog, ImageRecord};

/// Aggregate over images sharing (target, instrument, night, filter, kind,
/// exposure, gain). Derived entirely from the `images` table.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub id: i64,
    pub target: String,
    pub instrument: String,
    /// Date-of-observation bucket (`YYYY-MM-DD`): a capture night spanning
    /// midnight lands on one date.
    pub night: String,
    pub filter: String,
    pub kind: ImageKind,
    pub exposure_s: f64,
    pub gain: i64,
    pub binning: i64,
    pub frame_count: i64,
    pub total_exposure_s: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub width: i64,
    pub height: i64,
    pub camera_id: String,
    /// Bayer pattern of the member frames, when the sensor reports one.
    pub bayer: Option<String>,
    /// True when the members live in a master/processed repository.
    pub derived: bool,
}

impl SessionRow {
    /// Short human-readable description, used in logs and filenames.
    pub fn config_label(&self) -> String {
        let mut label = self.kind.as_str().to_string();
        match self.kind {
            ImageKind::Light | ImageKind::Flat | ImageKind::MasterFlat => {
                if !self.filter.is_empty() {
                    label.push_str(&format!("_{}", self.filter));
                }
            }
            ImageKind::Dark | ImageKind::MasterDark => {
                label.push_str(&format!("_{}s", self.exposure_s as i64));
            }
            _ => {}
        }
        label.push_str(&format!("_gain{}", self.gain));
        label
    }
}

/// Parameters of a master-candidate lookup.
///
/// Equality constraints present here are applied in SQL; tolerance checks
/// (dark exposure ±5%) stay in the calibration selector.
#[derive(Debug, Clone)]
pub struct CandidateQuery {
    /// Master kind to search for.
    pub kind: ImageKind,
    pub camera_id: Option<String>,
    pub instrument: Option<String>,
    pub filter: Option<String>,
    pub width: i64,
    pub height: i64,
    pub gain: Option<i64>,
    pub binning: Option<i64>,
    pub exposure_s: Option<f64>,
    /// Only candidates observed at or before this instant are returned
    /// (light-session instant plus the grace window).
    pub taken_before: DateTime<Utc>,
}

/// Bucket an observation instant to a capture night: shift back 12 hours so
/// frames after midnight stay with the evening they belong to.
pub(crate) fn night_of(observed: DateTime<Utc>) -> String {
    (observed - Duration::hours(12)).format("%Y-%m-%d").to_string()
}

fn session_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRow> {
    let kind_str: String = row.get("kind");
    let start_str: String = row.get("start");
    let end_str: String = row.get("end");
    let kind = kind_str
        .parse::<ImageKind>()
        .map_err(|reason| StarbashError::Schema {
            path: format!("session {}", row.get::<i64, _>("id")),
            reason,
        })?;
    let start = parse_instant(&start_str).ok_or_else(|| StarbashError::Schema {
        path: format!("session {}", row.get::<i64, _>("id")),
        reason: format!("unparseable start '{start_str}'"),
    })?;
    let end = parse_instant(&end_str).ok_or_else(|| StarbashError::Schema {
        path: format!("session {}", row.get::<i64, _>("id")),
        reason: format!("unparseable end '{end_str}'"),
    })?;
    let derived: i64 = row.get("derived");

    Ok(SessionRow {
        id: row.get("id"),
        target: row.get("target"),
        instrument: row.get("instrument"),
        night: row.get("night"),
        filter: row.get("filter"),
        kind,
        exposure_s: row.get("exposure_s"),
        gain: row.get("gain"),
        binning: row.get("binning"),
        frame_count: row.get("frame_count"),
        total_exposure_s: row.get("total_exposure_s"),
        start,
        end,
        width: row.get("width"),
        height: row.get("height"),
        camera_id: row.get("camera_id"),
        bayer: row.get("bayer"),
        derived: derived != 0,
    })
}

/// Grouping key for session aggregation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SessionKey {
    target: String,
    instrument: String,
    night: String,
    filter: String,
    kind: &'static str,
    /// Exposure in milliseconds, to keep the key hashable/orderable.
    exposure_ms: i64,
    gain: i64,
}

impl SessionKey {
    fn of(record: &ImageRecord) -> Self {
        Self {
            target: record.target.clone(),
            instrument: record.instrument.clone(),
            night: night_of(record.observed),
            filter: record.filter.clone(),
            kind: record.kind.as_str(),
            exposure_ms: (record.exposure_s * 1000.0).round() as i64,
            gain: record.gain,
        }
    }

    fn label(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.target, self.instrument, self.night, self.filter, self.kind
        )
    }
}

impl Catalog {
    /// Recompute the `sessions` table from `images`.
    ///
    /// Sessions are grouped by the natural key; a group whose members disagree
    /// on binning or dimensions is partitioned into consistent sub-sessions
    /// and reported, the rebuild continues. Insert order is deterministic so
    /// the same images always yield the same session ids.
    pub async fn rebuild_sessions(&self) -> Result<Vec<StarbashError>> {
        let images = self.all_images().await?;

        let mut groups: BTreeMap<SessionKey, Vec<ImageRecord>> = BTreeMap::new();
        for image in images {
            groups.entry(SessionKey::of(&image)).or_default().push(image);
        }

        let mut inconsistencies = Vec::new();

        sqlx::query("DELETE FROM sessions").execute(self.pool()).await?;
        sqlx::query("DELETE FROM sqlite_sequence WHERE name = 'sessions'")
            .execute(self.pool())
            .await?;

        for (key, members) in groups {
            // Partition by the attributes every member must share beyond the key.
            let mut partitions: BTreeMap<(i64, i64, i64), Vec<&ImageRecord>> = BTreeMap::new();
            for member in &members {
                partitions
                    .entry((member.binning, member.width, member.height))
                    .or_default()
                    .push(member);
            }
            if partitions.len() > 1 {
                let err = StarbashError::InconsistentSession {
                    key: key.label(),
                    reason: format!(
                        "members disagree on binning/dimensions ({} partitions); splitting",
                        partitions.len()
                    ),
                };
                warn!(error = %err, "partitioning inconsistent session");
                inconsistencies.push(err);
            }

            for ((binning, width, height), partition) in partitions {
                self.insert_session(&key, binning, width, height, &partition)
                    .await?;
            }
        }

        debug!(
            inconsistencies = inconsistencies.len(),
            "session rebuild complete"
        );
        Ok(inconsistencies)
    }

    async fn insert_session(
        &self,
        key: &SessionKey,
        binning: i64,
        width: i64,
        height: i64,
        members: &[&ImageRecord],
    ) -> Result<()> {
        debug_assert!(!members.is_empty());
        let start = members.iter().map(|m| m.observed).min().unwrap();
        let mut end = members.iter().map(|m| m.observed).max().unwrap();
        // The last frame is still exposing past its start instant.
        end += Duration::milliseconds(key.exposure_ms);
        let total: f64 = members
            .iter()
            .map(|m| m.exposure_s * m.stack_count as f64)
            .sum();
        let derived = members
            .iter()
            .any(|m| m.repo_kind.holds_derived_images() || m.kind.is_master());
        let camera_id = members[0].camera_id.clone();
        let bayer = members[0].bayer.clone();

        sqlx::query(
            r#"
            INSERT INTO sessions (
                target, instrument, night, filter, kind, exposure_s, gain,
                binning, frame_count, total_exposure_s, start, end,
                width, height, camera_id, bayer, derived
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&key.target)
        .bind(&key.instrument)
        .bind(&key.night)
        .bind(&key.filter)
        .bind(key.kind)
        .bind(key.exposure_ms as f64 / 1000.0)
        .bind(key.gain)
        .bind(binning)
        .bind(members.len() as i64)
        .bind(total)
        .bind(start.to_rfc3339())
        .bind(end.to_rfc3339())
        .bind(width)
        .bind(height)
        .bind(&camera_id)
        .bind(&bayer)
        .bind(derived as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Sessions matching the query conditions, optionally restricted to one
    /// image kind. Light queries exclude sessions from master/processed repos.
    pub async fn search_sessions(
        &self,
        conditions: &QueryConditions,
        kind: Option<ImageKind>,
    ) -> Result<Vec<SessionRow>> {
        let rows = sqlx::query(
            "SELECT * FROM sessions ORDER BY target, night, filter, kind, id",
        )
        .fetch_all(self.pool())
        .await?;

        let mut sessions = Vec::new();
        for row in &rows {
            let session = session_from_row(row)?;
            if let Some(kind) = kind {
                if session.kind != kind {
                    continue;
                }
                if kind == ImageKind::Light && session.derived {
                    continue;
                }
            }
            if conditions.matches_session(
                &session.target,
                &session.instrument,
                &session.filter,
                session.kind,
                session.start,
            ) {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    /// Master-frame candidates for the calibration selector.
    pub async fn find_candidates(&self, query: &CandidateQuery) -> Result<Vec<ImageRecord>> {
        let mut sql = String::from(
            "SELECT * FROM images WHERE kind = ? AND width = ? AND height = ? AND observed <= ?",
        );
        if query.camera_id.is_some() {
            sql.push_str(" AND camera_id = ?");
        }
        if query.instrument.is_some() {
            sql.push_str(" AND instrument = ?");
        }
        if query.filter.is_some() {
            sql.push_str(" AND filter = ?");
        }
        if query.gain.is_some() {
            sql.push_str(" AND gain = ?");
        }
        if query.binning.is_some() {
            sql.push_str(" AND binning = ?");
        }
        sql.push_str(" ORDER BY observed DESC, path");

        let mut q = sqlx::query(&sql)
            .bind(query.kind.as_str())
            .bind(query.width)
            .bind(query.height)
            .bind(query.taken_before.to_rfc3339());
        if let Some(camera) = &query.camera_id {
            q = q.bind(camera);
        }
        if let Some(instrument) = &query.instrument {
            q = q.bind(instrument);
        }
        if let Some(filter) = &query.filter {
            q = q.bind(filter);
        }
        if let Some(gain) = query.gain {
            q = q.bind(gain);
        }
        if let Some(binning) = query.binning {
            q = q.bind(binning);
        }

        let rows = q.fetch_all(self.pool()).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(super::images::record_from_row(row)?);
        }
        Ok(records)
    }

    /// All member images of a session, ordered by observation instant.
    pub async fn session_images(&self, session: &SessionRow) -> Result<Vec<ImageRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM images
            WHERE target = ? AND instrument = ? AND filter = ? AND kind = ?
              AND gain = ? AND binning = ?
            ORDER BY observed, path
            "#,
        )
        .bind(&session.target)
        .bind(&session.instrument)
        .bind(&session.filter)
        .bind(session.kind.as_str())
        .bind(session.gain)
        .bind(session.binning)
        .fetch_all(self.pool())
        .await?;

        let mut members = Vec::new();
        for row in &rows {
            let record = super::images::record_from_row(row)?;
            let same_night = night_of(record.observed) == session.night;
            let same_exposure = (record.exposure_s - session.exposure_s).abs() < 0.0005;
            if same_night && same_exposure {
                members.push(record);
            }
        }
        Ok(members)
    }

    /// Distinct targets over light sessions under the given conditions.
    pub async fn list_targets(&self, conditions: &QueryConditions) -> Result<Vec<String>> {
        let sessions = self
            .search_sessions(conditions, Some(ImageKind::Light))
            .await?;
        let mut targets: Vec<String> = sessions.into_iter().map(|s| s.target).collect();
        targets.sort();
        targets.dedup();
        Ok(targets)
    }

    /// Distinct instruments over light sessions under the given conditions.
    pub async fn list_instruments(&self, conditions: &QueryConditions) -> Result<Vec<String>> {
        let sessions = self
            .search_sessions(conditions, Some(ImageKind::Light))
            .await?;
        let mut instruments: Vec<String> =
            sessions.into_iter().map(|s| s.instrument).collect();
        instruments.sort();
        instruments.dedup();
        Ok(instruments)
    }

    /// Distinct filter labels over light sessions under the given conditions.
    pub async fn list_filters(&self, conditions: &QueryConditions) -> Result<Vec<String>> {
        let sessions = self
            .search_sessions(conditions, Some(ImageKind::Light))
            .await?;
        let mut filters: Vec<String> = sessions.into_iter().map(|s| s.filter).collect();
        filters.sort();
        filters.dedup();
        Ok(filters)
    }

    /// Publish a freshly generated master frame: upsert its record and fold
    /// it into the session aggregates so later selections can see it.
    pub async fn publish_master(&self, record: &ImageRecord) -> Result<()> {
        self.upsert_image(record).await?;
        self.rebuild_sessions().await?;
        Ok(())
    }
}

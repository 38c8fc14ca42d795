// src/catalog/images.rs

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use sqlx::Row;
use tracing::{debug, warn};

use crate::errors::{Result, StarbashError};
use crate::types::{ImageKind, RepoKind};

use super::Catalog;

/// Header keys that identify the observing site; stripped from the metadata
/// bag before it leaves the catalog.
const SITE_KEYS: &[&str] = &["SITELAT", "SITELONG", "SITE-LAT", "SITE-LONG", "OBSGEO-B", "OBSGEO-L"];

/// One physical frame known to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Absolute path; unique across the catalog.
    pub path: String,
    /// Id of the owning repository (its URL string).
    pub repo_id: String,
    pub repo_kind: RepoKind,
    pub kind: ImageKind,
    /// Observation instant, UTC.
    pub observed: DateTime<Utc>,
    pub exposure_s: f64,
    pub gain: i64,
    pub binning: i64,
    /// Normalized filter label.
    pub filter: String,
    /// Normalized target label.
    pub target: String,
    pub instrument: String,
    pub camera_id: String,
    pub width: i64,
    pub height: i64,
    pub bayer: Option<String>,
    /// Sensor temperature when the header carried one.
    pub temperature: Option<f64>,
    /// Frames stacked into this file by the capture device; 1 for raw frames.
    pub stack_count: i64,
    /// All original header cards, preserved for re-extraction.
    pub metadata: Map<String, Value>,
}

impl ImageRecord {
    /// Promote raw calibration kinds to `master-*` when the frame lives in a
    /// master repository or was pre-stacked on-device.
    pub fn effective_kind(&self) -> ImageKind {
        if self.kind.is_master() {
            return self.kind;
        }
        if self.repo_kind == RepoKind::Master || self.stack_count > 1 {
            self.kind.master_counterpart().unwrap_or(self.kind)
        } else {
            self.kind
        }
    }
}

/// Remove observing-site coordinates from a metadata bag.
pub fn scrub_site_keys(metadata: &Map<String, Value>) -> Map<String, Value> {
    metadata
        .iter()
        .filter(|(key, _)| !SITE_KEYS.contains(&key.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Parse an observation instant: RFC 3339 with offset, or a bare FITS-style
/// `YYYY-MM-DDTHH:MM:SS[.fff]` local-less timestamp treated as UTC.
pub fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    None
}

pub(crate) fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ImageRecord> {
    let kind_str: String = row.get("kind");
    let repo_kind_str: String = row.get("repo_kind");
    let observed_str: String = row.get("observed");
    let metadata_str: String = row.get("metadata");

    let kind = kind_str
        .parse::<ImageKind>()
        .map_err(|reason| StarbashError::Schema {
            path: row.get("path"),
            reason,
        })?;
    let repo_kind = repo_kind_str
        .parse::<RepoKind>()
        .map_err(|reason| StarbashError::Schema {
            path: row.get("path"),
            reason,
        })?;
    let observed = parse_instant(&observed_str).ok_or_else(|| StarbashError::Schema {
        path: row.get("path"),
        reason: format!("unparseable observed instant '{observed_str}'"),
    })?;
    let metadata: Map<String, Value> = serde_json::from_str(&metadata_str)?;

    Ok(ImageRecord {
        path: row.get("path"),
        repo_id: row.get("repo_id"),
        repo_kind,
        kind,
        observed,
        exposure_s: row.get("exposure_s"),
        gain: row.get("gain"),
        binning: row.get("binning"),
        filter: row.get("filter"),
        target: row.get("target"),
        instrument: row.get("instrument"),
        camera_id: row.get("camera_id"),
        width: row.get("width"),
        height: row.get("height"),
        bayer: row.get("bayer"),
        temperature: row.get("temperature"),
        stack_count: row.get("stack_count"),
        metadata,
    })
}

impl Catalog {
    /// Insert or update an image record, keyed by path. Idempotent.
    ///
    /// Fails with a schema error when dimensions or the instant are missing;
    /// inference (header fallback, layout parsing) happens in ingestion,
    /// before the record reaches the catalog.
    pub async fn upsert_image(&self, record: &ImageRecord) -> Result<()> {
        if record.width <= 0 || record.height <= 0 {
            return Err(StarbashError::Schema {
                path: record.path.clone(),
                reason: format!(
                    "missing or invalid dimensions {}x{}",
                    record.width, record.height
                ),
            });
        }
        if record.stack_count < 1 {
            return Err(StarbashError::Schema {
                path: record.path.clone(),
                reason: format!("stack count must be >= 1, got {}", record.stack_count),
            });
        }

        let kind = record.effective_kind();
        let metadata = serde_json::to_string(&record.metadata)?;

        sqlx::query(
            r#"
            INSERT INTO images (
                path, repo_id, repo_kind, kind, observed, exposure_s, gain,
                binning, filter, target, instrument, camera_id, width, height,
                bayer, temperature, stack_count, metadata
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                repo_id = excluded.repo_id,
                repo_kind = excluded.repo_kind,
                kind = excluded.kind,
                observed = excluded.observed,
                exposure_s = excluded.exposure_s,
                gain = excluded.gain,
                binning = excluded.binning,
                filter = excluded.filter,
                target = excluded.target,
                instrument = excluded.instrument,
                camera_id = excluded.camera_id,
                width = excluded.width,
                height = excluded.height,
                bayer = excluded.bayer,
                temperature = excluded.temperature,
                stack_count = excluded.stack_count,
                metadata = excluded.metadata
            "#,
        )
        .bind(&record.path)
        .bind(&record.repo_id)
        .bind(record.repo_kind.as_str())
        .bind(kind.as_str())
        .bind(record.observed.to_rfc3339())
        .bind(record.exposure_s)
        .bind(record.gain)
        .bind(record.binning)
        .bind(&record.filter)
        .bind(&record.target)
        .bind(&record.instrument)
        .bind(&record.camera_id)
        .bind(record.width)
        .bind(record.height)
        .bind(&record.bayer)
        .bind(record.temperature)
        .bind(record.stack_count)
        .bind(metadata)
        .execute(self.pool())
        .await?;

        debug!(path = %record.path, kind = %kind, "image upserted");
        Ok(())
    }

    /// Fetch an image by its unique path.
    pub async fn get_image(&self, path: &str) -> Result<Option<ImageRecord>> {
        let row = sqlx::query("SELECT * FROM images WHERE path = ?")
            .bind(path)
            .fetch_optional(self.pool())
            .await?;
        match row {
            Some(row) => Ok(Some(record_from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// All images, ordered by path. Mostly for diagnostics and tests.
    pub async fn all_images(&self) -> Result<Vec<ImageRecord>> {
        let rows = sqlx::query("SELECT * FROM images ORDER BY path")
            .fetch_all(self.pool())
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match record_from_row(row) {
                Ok(record) => records.push(record),
                Err(err) => warn!(error = %err, "skipping unreadable image row"),
            }
        }
        Ok(records)
    }

    pub async fn count_images(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    pub async fn count_sessions(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(self.pool())
            .await?;
        Ok(count)
    }

    /// Delete every image owned by a repository, then drop sessions that lost
    /// all their members.
    pub async fn remove_repo(&self, repo_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM images WHERE repo_id = ?")
            .bind(repo_id)
            .execute(self.pool())
            .await?;
        let removed = result.rows_affected();
        debug!(repo = %repo_id, removed, "removed repo images");
        // Sessions are a pure function of images; recompute.
        self.rebuild_sessions().await?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn light(path: &str) -> ImageRecord {
        let mut metadata = Map::new();
        metadata.insert("OBJECT".to_string(), json!("NGC 281"));
        metadata.insert("SITELAT".to_string(), json!(47.6));
        ImageRecord {
            path: path.to_string(),
            repo_id: "file:///raw".to_string(),
            repo_kind: RepoKind::RawSource,
            kind: ImageKind::Light,
            observed: parse_instant("2025-07-15T22:00:00").unwrap(),
            exposure_s: 10.0,
            gain: 80,
            binning: 1,
            filter: "HaOiii".to_string(),
            target: "ngc281".to_string(),
            instrument: "seestar".to_string(),
            camera_id: "IMX462".to_string(),
            width: 1080,
            height: 1920,
            bayer: Some("RGGB".to_string()),
            temperature: Some(-9.5),
            stack_count: 1,
            metadata,
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_path() {
        let catalog = Catalog::open_memory().await.unwrap();
        let mut record = light("/raw/a.fits");
        catalog.upsert_image(&record).await.unwrap();
        record.gain = 120;
        catalog.upsert_image(&record).await.unwrap();

        assert_eq!(catalog.count_images().await.unwrap(), 1);
        let stored = catalog.get_image("/raw/a.fits").await.unwrap().unwrap();
        assert_eq!(stored.gain, 120);
        // the full header bag round-trips
        assert_eq!(stored.metadata["OBJECT"], json!("NGC 281"));
    }

    #[tokio::test]
    async fn missing_dimensions_are_a_schema_error() {
        let catalog = Catalog::open_memory().await.unwrap();
        let mut record = light("/raw/bad.fits");
        record.width = 0;
        let err = catalog.upsert_image(&record).await.unwrap_err();
        assert!(matches!(err, StarbashError::Schema { .. }), "{err}");
    }

    #[tokio::test]
    async fn stack_count_below_one_is_rejected() {
        let catalog = Catalog::open_memory().await.unwrap();
        let mut record = light("/raw/bad.fits");
        record.stack_count = 0;
        assert!(catalog.upsert_image(&record).await.is_err());
    }

    #[test]
    fn site_keys_are_scrubbed() {
        let record = light("/raw/a.fits");
        let scrubbed = scrub_site_keys(&record.metadata);
        assert!(!scrubbed.contains_key("SITELAT"));
        assert!(scrubbed.contains_key("OBJECT"));
    }

    #[test]
    fn instants_parse_with_and_without_offsets() {
        assert!(parse_instant("2025-07-15T22:00:00").is_some());
        assert!(parse_instant("2025-07-15T22:00:00.123").is_some());
        assert!(parse_instant("2025-07-15T22:00:00+02:00").is_some());
        assert!(parse_instant("not-a-date").is_none());
    }
}

// src/ingest/mod.rs

//! Repository ingestion: scan image repositories, extract the metadata
//! contract from each frame, and upsert the records into the catalog.

pub mod fits;
pub mod layout;

use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::aliases::{normalize_target, Aliases};
use crate::catalog::{parse_instant, Catalog, ImageRecord};
use crate::errors::Result;
use crate::repo::Repo;
use crate::types::{ImageKind, RepoKind};

/// Outcome counters for one repository scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub scanned: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub dropped: usize,
}

fn header_str<'a>(headers: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    headers.get(key).and_then(Value::as_str)
}

fn header_f64(headers: &Map<String, Value>, key: &str) -> Option<f64> {
    match headers.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn header_i64(headers: &Map<String, Value>, key: &str) -> Option<i64> {
    header_f64(headers, key).map(|f| f.round() as i64)
}

/// Build an image record from extracted headers.
///
/// Returns `None` (with a warning) when the frame is missing its kind or
/// observation instant even after fallback inference; such frames cannot be
/// aggregated into sessions.
pub fn record_from_headers(
    path: &Path,
    repo_id: &str,
    repo_kind: RepoKind,
    headers: Map<String, Value>,
    aliases: &Aliases,
) -> Option<ImageRecord> {
    let kind_label = header_str(&headers, "IMAGETYP")
        .or_else(|| header_str(&headers, "FRAME"))
        .map(|s| aliases.normalize(s));
    let kind = match kind_label.as_deref().map(str::parse::<ImageKind>) {
        Some(Ok(kind)) => kind,
        Some(Err(reason)) => {
            warn!(path = %path.display(), reason, "unrecognized image kind, skipping");
            return None;
        }
        None => {
            warn!(path = %path.display(), "missing IMAGETYP/FRAME header, skipping");
            return None;
        }
    };

    let observed = match header_str(&headers, "DATE-OBS").and_then(parse_instant) {
        Some(instant) => instant,
        None => {
            warn!(path = %path.display(), "missing or unparseable DATE-OBS, skipping");
            return None;
        }
    };

    let filter = header_str(&headers, "FILTER")
        .map(|s| aliases.normalize(s))
        .unwrap_or_default();
    let target = header_str(&headers, "OBJECT")
        .map(normalize_target)
        .unwrap_or_default();

    Some(ImageRecord {
        path: path.display().to_string(),
        repo_id: repo_id.to_string(),
        repo_kind,
        kind,
        observed,
        exposure_s: header_f64(&headers, "EXPTIME").unwrap_or(0.0),
        gain: header_i64(&headers, "GAIN").unwrap_or(0),
        binning: header_i64(&headers, "XBINNING").unwrap_or(1),
        filter,
        target,
        instrument: header_str(&headers, "TELESCOP").unwrap_or("unknown").to_string(),
        camera_id: header_str(&headers, "INSTRUME").unwrap_or("unknown").to_string(),
        width: header_i64(&headers, "NAXIS1").unwrap_or(0),
        height: header_i64(&headers, "NAXIS2").unwrap_or(0),
        bayer: header_str(&headers, "BAYERPAT").map(str::to_string),
        temperature: header_f64(&headers, "CCD-TEMP"),
        stack_count: header_i64(&headers, "STACKCNT").unwrap_or(1).max(1),
        metadata: headers,
    })
}

fn is_fits_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(str::to_lowercase).as_deref(),
        Some("fits") | Some("fit")
    )
}

/// Scan one repository and upsert every readable frame. Idempotent: frames
/// already indexed are skipped unless `force` is set.
///
/// Session aggregates are NOT rebuilt here; callers rebuild once after all
/// repositories have been scanned.
pub async fn reindex_repo(
    catalog: &Catalog,
    repo: &Repo,
    aliases: &Aliases,
    force: bool,
) -> Result<IngestStats> {
    let mut stats = IngestStats::default();

    if matches!(repo.kind, RepoKind::Recipe | RepoKind::Preferences) {
        return Ok(stats);
    }
    let Some(root) = repo.root() else {
        debug!(repo = %repo.url, "repo has no filesystem root, nothing to scan");
        return Ok(stats);
    };

    info!(repo = %repo.url, root = %root.display(), "indexing repository");
    for entry in walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_fits_file(path) {
            continue;
        }
        stats.scanned += 1;

        let path_str = path.display().to_string();
        if !force && catalog.get_image(&path_str).await?.is_some() {
            stats.skipped += 1;
            continue;
        }

        let mut headers = match fits::read_primary_header(path) {
            Ok(headers) => headers,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "unreadable FITS header");
                stats.dropped += 1;
                continue;
            }
        };
        layout::extend_sparse_headers(&mut headers, path);

        let Some(record) = record_from_headers(path, &repo.url, repo.kind, headers, aliases)
        else {
            stats.dropped += 1;
            continue;
        };

        match catalog.upsert_image(&record).await {
            Ok(()) => stats.indexed += 1,
            Err(err) => {
                // Catalog errors are per-image; drop the row and continue.
                warn!(path = %path.display(), error = %err, "row rejected by catalog");
                stats.dropped += 1;
            }
        }
    }

    info!(
        repo = %repo.url,
        scanned = stats.scanned,
        indexed = stats.indexed,
        skipped = stats.skipped,
        dropped = stats.dropped,
        "repository indexed"
    );
    Ok(stats)
}

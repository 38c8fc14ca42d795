// src/repo/remote.rs

//! Remote repository documents: fetched once per run with a conditional
//! request, cached on disk, and served from cache when offline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::errors::{Result, StarbashError};

/// Serve a stale cached copy on fetch errors for at most this long.
const STALE_IF_ERROR: Duration = Duration::from_secs(7 * 24 * 3600);

fn cache_paths(cache_dir: &Path, url: &str) -> (PathBuf, PathBuf) {
    let key = blake3::hash(url.as_bytes()).to_hex().to_string();
    (
        cache_dir.join(format!("{key}.toml")),
        cache_dir.join(format!("{key}.etag")),
    )
}

fn read_cached(body_path: &Path) -> Option<String> {
    std::fs::read_to_string(body_path).ok()
}

fn cache_age(body_path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(body_path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}

/// Fetch a remote repository document, preferring the conditional-request
/// cache. Network failures degrade to the cached copy (bounded staleness);
/// no cached copy means the repository is unavailable.
pub async fn fetch_cached(
    client: &reqwest::Client,
    url: &str,
    cache_dir: &Path,
) -> Result<String> {
    std::fs::create_dir_all(cache_dir)?;
    let (body_path, etag_path) = cache_paths(cache_dir, url);

    let mut request = client.get(url);
    if let Ok(etag) = std::fs::read_to_string(&etag_path) {
        request = request.header(reqwest::header::IF_NONE_MATCH, etag.trim().to_string());
    }

    match request.send().await {
        Ok(response) if response.status() == reqwest::StatusCode::NOT_MODIFIED => {
            debug!(url, "remote document unchanged, using cache");
            read_cached(&body_path)
                .ok_or_else(|| StarbashError::RemoteUnavailable(url.to_string()))
        }
        Ok(response) if response.status().is_success() => {
            let etag = response
                .headers()
                .get(reqwest::header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response
                .text()
                .await
                .map_err(|e| StarbashError::Other(e.into()))?;
            std::fs::write(&body_path, &body)?;
            if let Some(etag) = etag {
                std::fs::write(&etag_path, etag)?;
            }
            debug!(url, bytes = body.len(), "remote document fetched");
            Ok(body)
        }
        Ok(response) => {
            warn!(url, status = %response.status(), "remote fetch failed, trying cache");
            serve_stale(url, &body_path)
        }
        Err(err) => {
            warn!(url, error = %err, "remote fetch errored, trying cache");
            serve_stale(url, &body_path)
        }
    }
}

fn serve_stale(url: &str, body_path: &Path) -> Result<String> {
    match (read_cached(body_path), cache_age(body_path)) {
        (Some(body), Some(age)) if age <= STALE_IF_ERROR => {
            warn!(url, age_secs = age.as_secs(), "serving stale cached copy");
            Ok(body)
        }
        _ => Err(StarbashError::RemoteUnavailable(url.to_string())),
    }
}

/// Read a previously fetched document from the cache without touching the
/// network (used by the synchronous import resolver).
pub fn read_from_cache(url: &str, cache_dir: &Path) -> Result<String> {
    let (body_path, _) = cache_paths(cache_dir, url);
    read_cached(&body_path).ok_or_else(|| StarbashError::RemoteUnavailable(url.to_string()))
}

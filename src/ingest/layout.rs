// src/ingest/layout.rs

//! Fallback metadata inference for capture devices that write sparse FITS
//! headers but encode the capture settings in their directory layout.
//!
//! The supported layout is the smart-telescope style tree:
//!
//! ```text
//! CALI_FRAME/bias/cam_0/bias_gain_2_bin_1.fits
//! CALI_FRAME/dark/cam_0/dark_exp_60.000000_gain_60_bin_1_20C_stack_8.fits
//! CALI_FRAME/flat/cam_0/flat_gain_2_bin_1_ir_1.fits
//! DWARF_DARK/tele_exp_60_gain_60_bin_1_<stamp>/raw_60s_60_0002_<stamp>_20C.fits
//! <target>/shotsInfo.json + raw frames
//! ```
//!
//! Only missing keys are filled in; anything the real header carries wins.

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Characteristic subdirectory names that signal this layout.
const CALIBRATION_ROOT: &str = "CALI_FRAME";
const DARK_LIBRARY_ROOT: &str = "DWARF_DARK";
/// Per-shot sidecar written next to light frames.
const SIDECAR_NAME: &str = "shotsInfo.json";

fn bias_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^bias_gain_(\d+)_bin_(\d+)\.fits?$").expect("valid regex"))
}

fn dark_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^dark_exp_([\d.]+)_gain_(\d+)_bin_(\d+)(?:_(-?\d+)C)?(?:_stack_(\d+))?\.fits?$",
        )
        .expect("valid regex")
    })
}

fn flat_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^flat_gain_(\d+)_bin_(\d+)_ir_(\d)\.fits?$").expect("valid regex")
    })
}

fn raw_frame_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^raw_([\d.]+)s_(\d+)_\d+_(\d{8})-(\d{6})\d*(?:_(-?\d+)C)?\.fits?$")
            .expect("valid regex")
    })
}

fn dark_dir_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(tele|wide)_exp_([\d.]+)_gain_(\d+)_bin_(\d+)_").expect("valid regex")
    })
}

/// Does this path live inside a recognized capture-device layout?
pub fn is_sparse_layout(path: &Path) -> bool {
    let in_known_root = path.ancestors().any(|a| {
        a.file_name()
            .map(|n| n == CALIBRATION_ROOT || n == DARK_LIBRARY_ROOT)
            .unwrap_or(false)
    });
    in_known_root
        || path
            .parent()
            .map(|dir| dir.join(SIDECAR_NAME).exists())
            .unwrap_or(false)
}

/// Filter wheel positions of the built-in IR filter.
fn ir_filter_label(position: &str) -> &'static str {
    match position {
        "0" => "VIS",
        "1" => "Astro",
        "2" => "Duo",
        _ => "VIS",
    }
}

/// Telescope/camera identity from the `cam_N` path component.
fn camera_identity(path: &Path) -> (&'static str, &'static str) {
    let is_wide = path.ancestors().any(|a| {
        a.file_name().map(|n| n == "cam_1").unwrap_or(false)
    });
    if is_wide {
        ("D3WIDE", "WIDE")
    } else {
        ("D3TELE", "TELE")
    }
}

fn set_missing(headers: &mut Map<String, Value>, key: &str, value: Value) {
    if !headers.contains_key(key) {
        headers.insert(key.to_string(), value);
    }
}

fn mtime_instant(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    let secs = modified
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs() as i64;
    Utc.timestamp_opt(secs, 0).single()
}

/// Derive missing header fields from the path and sidecar. Returns true when
/// the layout matched and inference ran.
pub fn extend_sparse_headers(headers: &mut Map<String, Value>, path: &Path) -> bool {
    if !is_sparse_layout(path) {
        return false;
    }

    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    let (telescop, instrume) = camera_identity(path);
    set_missing(headers, "TELESCOP", json!(telescop));
    set_missing(headers, "INSTRUME", json!(instrume));

    let mut matched = false;

    if let Some(caps) = bias_re().captures(filename) {
        set_missing(headers, "IMAGETYP", json!("bias"));
        // A bias is a zero-length read; the device uses its shortest shutter.
        set_missing(headers, "EXPTIME", json!(0.001));
        set_missing(headers, "GAIN", json!(caps[1].parse::<i64>().unwrap_or(0)));
        set_missing(headers, "XBINNING", json!(caps[2].parse::<i64>().unwrap_or(1)));
        matched = true;
    } else if let Some(caps) = dark_re().captures(filename) {
        set_missing(headers, "IMAGETYP", json!("dark"));
        set_missing(headers, "EXPTIME", json!(caps[1].parse::<f64>().unwrap_or(0.0)));
        set_missing(headers, "GAIN", json!(caps[2].parse::<i64>().unwrap_or(0)));
        set_missing(headers, "XBINNING", json!(caps[3].parse::<i64>().unwrap_or(1)));
        if let Some(temp) = caps.get(4) {
            set_missing(headers, "CCD-TEMP", json!(temp.as_str().parse::<f64>().unwrap_or(0.0)));
        }
        if let Some(stack) = caps.get(5) {
            set_missing(headers, "STACKCNT", json!(stack.as_str().parse::<i64>().unwrap_or(1)));
        }
        matched = true;
    } else if let Some(caps) = flat_re().captures(filename) {
        set_missing(headers, "IMAGETYP", json!("flat"));
        set_missing(headers, "EXPTIME", json!(0.0));
        set_missing(headers, "GAIN", json!(caps[1].parse::<i64>().unwrap_or(0)));
        set_missing(headers, "XBINNING", json!(caps[2].parse::<i64>().unwrap_or(1)));
        set_missing(headers, "FILTER", json!(ir_filter_label(&caps[3])));
        matched = true;
    } else if let Some(caps) = raw_frame_re().captures(filename) {
        set_missing(headers, "EXPTIME", json!(caps[1].parse::<f64>().unwrap_or(0.0)));
        set_missing(headers, "GAIN", json!(caps[2].parse::<i64>().unwrap_or(0)));
        let date = &caps[3];
        let time = &caps[4];
        let stamp = format!(
            "{}-{}-{}T{}:{}:{}",
            &date[0..4], &date[4..6], &date[6..8],
            &time[0..2], &time[2..4], &time[4..6]
        );
        set_missing(headers, "DATE-OBS", json!(stamp));
        if let Some(temp) = caps.get(5) {
            set_missing(headers, "CCD-TEMP", json!(temp.as_str().parse::<f64>().unwrap_or(0.0)));
        }
        // Frames inside the dark library are darks; anything else is a light.
        let in_dark_library = path.ancestors().any(|a| {
            a.file_name().map(|n| n == DARK_LIBRARY_ROOT).unwrap_or(false)
        });
        set_missing(
            headers,
            "IMAGETYP",
            json!(if in_dark_library { "dark" } else { "light" }),
        );
        matched = true;
    }

    // The enclosing directory name carries settings for dark-library frames.
    if let Some(dir_name) = path
        .parent()
        .and_then(|d| d.file_name())
        .and_then(|n| n.to_str())
    {
        if let Some(caps) = dark_dir_re().captures(dir_name) {
            set_missing(headers, "EXPTIME", json!(caps[2].parse::<f64>().unwrap_or(0.0)));
            set_missing(headers, "GAIN", json!(caps[3].parse::<i64>().unwrap_or(0)));
            set_missing(headers, "XBINNING", json!(caps[4].parse::<i64>().unwrap_or(1)));
            matched = true;
        }
    }

    // Per-shot sidecar fills target/exposure/gain for light frames.
    if let Some(sidecar) = path.parent().map(|d| d.join(SIDECAR_NAME)) {
        if let Ok(text) = std::fs::read_to_string(&sidecar) {
            if let Ok(Value::Object(shot)) = serde_json::from_str::<Value>(&text) {
                debug!(path = %path.display(), "applying shot-info sidecar");
                if let Some(target) = shot.get("target") {
                    set_missing(headers, "OBJECT", target.clone());
                }
                if let Some(exp) = shot.get("exp") {
                    set_missing(headers, "EXPTIME", exp.clone());
                }
                if let Some(gain) = shot.get("gain") {
                    set_missing(headers, "GAIN", gain.clone());
                }
                if let Some(binning) = shot.get("binning") {
                    set_missing(headers, "XBINNING", binning.clone());
                }
                if let Some(ir) = shot.get("ir").and_then(Value::as_i64) {
                    set_missing(headers, "FILTER", json!(ir_filter_label(&ir.to_string())));
                }
                set_missing(headers, "IMAGETYP", json!("light"));
                matched = true;
            }
        }
    }

    // Calibration files carry no instant of their own; fall back to the
    // file's modification time so session bucketing still works.
    if !headers.contains_key("DATE-OBS") {
        if let Some(instant) = mtime_instant(path) {
            set_missing(
                headers,
                "DATE-OBS",
                json!(instant.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
            );
        }
    }

    matched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    #[test]
    fn cali_frame_bias_is_inferred() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp
            .path()
            .join("CALI_FRAME/bias/cam_0/bias_gain_2_bin_1.fits");
        touch(&path);

        let mut headers = Map::new();
        assert!(extend_sparse_headers(&mut headers, &path));
        assert_eq!(headers["IMAGETYP"], json!("bias"));
        assert_eq!(headers["GAIN"], json!(2));
        assert_eq!(headers["XBINNING"], json!(1));
        assert_eq!(headers["TELESCOP"], json!("D3TELE"));
        assert_eq!(headers["INSTRUME"], json!("TELE"));
        assert_eq!(headers["EXPTIME"], json!(0.001));
        assert!(headers["DATE-OBS"].as_str().unwrap() >= "2000-01-01T00:00:00.000");
    }

    #[test]
    fn cam_1_is_the_wide_camera() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp
            .path()
            .join("CALI_FRAME/bias/cam_1/bias_gain_2_bin_1.fits");
        touch(&path);

        let mut headers = Map::new();
        assert!(extend_sparse_headers(&mut headers, &path));
        assert_eq!(headers["TELESCOP"], json!("D3WIDE"));
        assert_eq!(headers["INSTRUME"], json!("WIDE"));
    }

    #[test]
    fn dark_with_temperature_and_stack() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp
            .path()
            .join("CALI_FRAME/dark/cam_0/dark_exp_60.000000_gain_60_bin_1_20C_stack_8.fits");
        touch(&path);

        let mut headers = Map::new();
        assert!(extend_sparse_headers(&mut headers, &path));
        assert_eq!(headers["IMAGETYP"], json!("dark"));
        assert_eq!(headers["EXPTIME"], json!(60.0));
        assert_eq!(headers["GAIN"], json!(60));
        assert_eq!(headers["CCD-TEMP"], json!(20.0));
        assert_eq!(headers["STACKCNT"], json!(8));
    }

    #[test]
    fn flat_filter_positions() {
        let tmp = tempfile::tempdir().unwrap();
        for (position, label) in [("0", "VIS"), ("1", "Astro"), ("2", "Duo")] {
            let path = tmp
                .path()
                .join(format!("CALI_FRAME/flat/cam_0/flat_gain_2_bin_1_ir_{position}.fits"));
            touch(&path);
            let mut headers = Map::new();
            assert!(extend_sparse_headers(&mut headers, &path));
            assert_eq!(headers["FILTER"], json!(label), "position {position}");
            assert_eq!(headers["IMAGETYP"], json!("flat"));
        }
    }

    #[test]
    fn dark_library_raw_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(
            "DWARF_DARK/tele_exp_60_gain_60_bin_1_2025-10-20-03-20-10-952/raw_60s_60_0002_20251020-032310186_20C.fits",
        );
        touch(&path);

        let mut headers = Map::new();
        assert!(extend_sparse_headers(&mut headers, &path));
        assert_eq!(headers["IMAGETYP"], json!("dark"));
        assert_eq!(headers["EXPTIME"], json!(60.0));
        assert_eq!(headers["GAIN"], json!(60));
        assert_eq!(headers["DATE-OBS"], json!("2025-10-20T03:23:10"));
        assert_eq!(headers["CCD-TEMP"], json!(20.0));
    }

    #[test]
    fn sidecar_fills_light_frame_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("sadr_session");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(SIDECAR_NAME),
            r#"{"target": "Sadr", "exp": 10, "gain": 80, "binning": 1, "ir": 2}"#,
        )
        .unwrap();
        let path = dir.join("raw_10s_80_0001_20250715-220000123.fits");
        touch(&path);

        let mut headers = Map::new();
        assert!(extend_sparse_headers(&mut headers, &path));
        assert_eq!(headers["OBJECT"], json!("Sadr"));
        assert_eq!(headers["IMAGETYP"], json!("light"));
        assert_eq!(headers["FILTER"], json!("Duo"));
        assert_eq!(headers["DATE-OBS"], json!("2025-07-15T22:00:00"));
    }

    #[test]
    fn real_header_values_win() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp
            .path()
            .join("CALI_FRAME/bias/cam_0/bias_gain_2_bin_1.fits");
        touch(&path);

        let mut headers = Map::new();
        headers.insert("GAIN".to_string(), json!(99));
        extend_sparse_headers(&mut headers, &path);
        assert_eq!(headers["GAIN"], json!(99));
    }

    #[test]
    fn unrelated_paths_do_not_match() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ordinary/frame0001.fits");
        touch(&path);
        let mut headers = Map::new();
        assert!(!extend_sparse_headers(&mut headers, &path));
        assert!(headers.is_empty());
    }
}

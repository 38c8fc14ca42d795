// tests/common/mod.rs

//! Shared fixtures: synthesized FITS frames, repository trees, and a recipe
//! whose stages run entirely through the hermetic script tool.

#![allow(dead_code)]

use std::path::Path;

use serde_json::json;

use starbash::app::{AppOptions, Starbash};
use starbash::ingest::fits;

/// Everything needed to synthesize one frame's header.
#[derive(Debug, Clone)]
pub struct FrameSpec {
    pub kind: &'static str,
    pub target: &'static str,
    pub filter: &'static str,
    pub instrument: &'static str,
    pub camera: &'static str,
    pub date: &'static str,
    pub exposure: f64,
    pub gain: i64,
    pub binning: i64,
    pub width: i64,
    pub height: i64,
    pub bayer: Option<&'static str>,
    pub stack: i64,
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self {
            kind: "light",
            target: "sadr",
            filter: "LP",
            instrument: "seestar",
            camera: "IMX462",
            date: "2025-07-15T22:00:00",
            exposure: 10.0,
            gain: 80,
            binning: 1,
            width: 1080,
            height: 1920,
            bayer: Some("RGGB"),
            stack: 1,
        }
    }
}

pub fn write_frame(path: &Path, spec: &FrameSpec) {
    let mut cards = vec![
        ("NAXIS1", json!(spec.width)),
        ("NAXIS2", json!(spec.height)),
        ("IMAGETYP", json!(spec.kind)),
        ("DATE-OBS", json!(spec.date)),
        ("EXPTIME", json!(spec.exposure)),
        ("GAIN", json!(spec.gain)),
        ("XBINNING", json!(spec.binning)),
        ("TELESCOP", json!(spec.instrument)),
        ("INSTRUME", json!(spec.camera)),
    ];
    if !spec.target.is_empty() {
        cards.push(("OBJECT", json!(spec.target)));
    }
    if !spec.filter.is_empty() {
        cards.push(("FILTER", json!(spec.filter)));
    }
    if let Some(bayer) = spec.bayer {
        cards.push(("BAYERPAT", json!(bayer)));
    }
    if spec.stack > 1 {
        cards.push(("STACKCNT", json!(spec.stack)));
    }
    fits::write_header_only(path, &cards).expect("write test frame");
}

/// Write `count` frames of the same session, a minute apart.
pub fn write_lights(dir: &Path, count: usize, spec: &FrameSpec) {
    let base = starbash::catalog::parse_instant(spec.date).expect("valid spec date");
    for index in 0..count {
        let mut frame = spec.clone();
        let date = (base + chrono::Duration::minutes(index as i64))
            .format("%Y-%m-%dT%H:%M:%S")
            .to_string();
        // Leaking keeps FrameSpec a plain bundle of &'static str in tests.
        frame.date = Box::leak(date.into_boxed_str());
        write_frame(&dir.join(format!("{}_{index:04}.fits", spec.kind)), &frame);
    }
}

pub fn make_repo(dir: &Path, kind: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("starbash.toml"),
        format!("[repo]\nkind = \"{kind}\"\n"),
    )
    .unwrap();
}

pub fn make_recipe_repo(dir: &Path, document: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("starbash.toml"), document).unwrap();
}

/// A full pipeline recipe that only uses the hermetic script tool, so tests
/// never depend on external binaries. Stage names and shape mirror the
/// bundled defaults.
pub const SCRIPT_RECIPE: &str = r#"
[repo]
kind = "recipe"

stages = [
    { name = "setup.masters", priority = 10 },
    { name = "session.lights", priority = 20 },
    { name = "final.stack", priority = 30 },
    { name = "final.post", priority = 40 },
]

[[stage]]
name = "master_bias"
when = "setup.masters"
priority = 10
tool = { name = "script" }
multiplex = "per-session"
output-kind = "master"
output = ["{camera_id}/bias/master_bias_{session_config}_{date}.fits"]
script = """
touch master_bias_{session_config}_{date}.fits
"""

[[stage.input]]
kind = "session"
type = "bias"

[stage.requires]
kind = "bias"

[[stage]]
name = "light_calibrated"
when = "session.lights"
priority = 30
tool = { name = "script" }
multiplex = "per-session"
output = ["{process_dir}/cal_s{session}.fits"]
script = """
log calibrating session {session} with {master_darkorbias}
touch cal_s{session}.fits
"""

[[stage.input]]
kind = "session"
type = "light"

[[stage.input]]
kind = "master"
type = "darkorbias"

[[stage.input]]
kind = "master"
type = "flat"
required = false

[[stage]]
name = "light_no_darks"
when = "session.lights"
priority = 10
tool = { name = "script" }
multiplex = "per-session"
output = ["{process_dir}/cal_s{session}.fits"]
script = """
touch cal_s{session}.fits
"""

[[stage.input]]
kind = "session"
type = "light"

[[stage]]
name = "stack"
when = "final.stack"
priority = 20
tool = { name = "script" }
multiplex = "per-target"
output = ["{process_dir}/stacked.fits"]
script = """
touch stacked.fits
"""

[[stage.input]]
kind = "glob"
pattern = "{process_dir}/cal_s*.fits"

[stage.requires]
filters-none-of = ["SiiOiii"]

[[stage]]
name = "stack_duo"
when = "final.stack"
priority = 30
tool = { name = "script" }
multiplex = "per-target"
output = [
    "{process_dir}/stacked_Ha.fits",
    "{process_dir}/stacked_OIII.fits",
    "{process_dir}/stacked_Sii.fits",
]
script = """
touch stacked_Ha.fits
touch stacked_OIII.fits
touch stacked_Sii.fits
"""

[[stage.input]]
kind = "glob"
pattern = "{process_dir}/cal_s*.fits"

[stage.requires]
filters-all-of = ["HaOiii", "SiiOiii"]

[[stage]]
name = "background_removal"
when = "final.post"
priority = 20
tool = { name = "script" }
multiplex = "per-target"
output-kind = "processed"
output = ["stacked.fits"]
script = """
log removing background from {input_first}
"""

[[stage.input]]
kind = "glob"
pattern = "{process_dir}/stacked.fits"

[stage.requires]
filters-none-of = ["SiiOiii"]

[[stage]]
name = "background_removal_ha"
when = "final.post"
priority = 30
tool = { name = "script" }
multiplex = "per-target"
output-kind = "processed"
output = ["stacked_Ha.fits"]
script = """
log removing background from {input_first}
"""

[[stage.input]]
kind = "glob"
pattern = "{process_dir}/stacked_Ha.fits"

[stage.requires]
filters-all-of = ["HaOiii", "SiiOiii"]

[[stage]]
name = "background_removal_oiii"
when = "final.post"
priority = 30
tool = { name = "script" }
multiplex = "per-target"
output-kind = "processed"
output = ["stacked_OIII.fits"]
script = """
log removing background from {input_first}
"""

[[stage.input]]
kind = "glob"
pattern = "{process_dir}/stacked_OIII.fits"

[stage.requires]
filters-all-of = ["HaOiii", "SiiOiii"]

[[stage]]
name = "background_removal_sii"
when = "final.post"
priority = 30
tool = { name = "script" }
multiplex = "per-target"
output-kind = "processed"
output = ["stacked_Sii.fits"]
script = """
log removing background from {input_first}
"""

[[stage.input]]
kind = "glob"
pattern = "{process_dir}/stacked_Sii.fits"

[stage.requires]
filters-all-of = ["HaOiii", "SiiOiii"]
"#;

/// Open an engine instance rooted in a scratch dir, without the bundled
/// recipes (tests bring their own).
pub async fn open_app(base: &Path) -> Starbash {
    Starbash::open(AppOptions {
        base_dir: Some(base.to_path_buf()),
        use_builtin_recipes: false,
        ..Default::default()
    })
    .await
    .expect("open engine")
}

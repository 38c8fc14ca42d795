// src/types.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Kind of a single image frame.
///
/// `Master*` kinds are calibrated/stacked aggregates; a raw calibration frame
/// is promoted to its `Master*` counterpart when it lives in a master
/// repository or carries a stack count greater than one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageKind {
    Light,
    Flat,
    Dark,
    Bias,
    MasterFlat,
    MasterDark,
    MasterBias,
}

impl ImageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageKind::Light => "light",
            ImageKind::Flat => "flat",
            ImageKind::Dark => "dark",
            ImageKind::Bias => "bias",
            ImageKind::MasterFlat => "master-flat",
            ImageKind::MasterDark => "master-dark",
            ImageKind::MasterBias => "master-bias",
        }
    }

    /// True for the `master-*` kinds.
    pub fn is_master(&self) -> bool {
        matches!(
            self,
            ImageKind::MasterFlat | ImageKind::MasterDark | ImageKind::MasterBias
        )
    }

    /// The master kind corresponding to a raw calibration kind.
    ///
    /// Lights have no master counterpart; they stay lights even when
    /// pre-stacked by the capture device.
    pub fn master_counterpart(&self) -> Option<ImageKind> {
        match self {
            ImageKind::Flat => Some(ImageKind::MasterFlat),
            ImageKind::Dark => Some(ImageKind::MasterDark),
            ImageKind::Bias => Some(ImageKind::MasterBias),
            _ => None,
        }
    }

    /// The raw calibration kind behind a master kind (identity otherwise).
    pub fn raw_counterpart(&self) -> ImageKind {
        match self {
            ImageKind::MasterFlat => ImageKind::Flat,
            ImageKind::MasterDark => ImageKind::Dark,
            ImageKind::MasterBias => ImageKind::Bias,
            other => *other,
        }
    }
}

impl fmt::Display for ImageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "light" | "lights" => Ok(ImageKind::Light),
            "flat" | "flats" => Ok(ImageKind::Flat),
            "dark" | "darks" => Ok(ImageKind::Dark),
            "bias" | "biases" | "offset" => Ok(ImageKind::Bias),
            "master-flat" | "masterflat" => Ok(ImageKind::MasterFlat),
            "master-dark" | "masterdark" => Ok(ImageKind::MasterDark),
            "master-bias" | "masterbias" => Ok(ImageKind::MasterBias),
            other => Err(format!("unknown image kind: {other}")),
        }
    }
}

/// Kind of a configured repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoKind {
    /// Declarative recipes/stages only, no image data.
    Recipe,
    /// Raw capture data (lights and raw calibration frames).
    RawSource,
    /// Generated master calibration frames.
    Master,
    /// Final processed outputs per target.
    ProcessedOutput,
    /// The user preferences repo; participates in precedence like any other.
    Preferences,
}

impl RepoKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoKind::Recipe => "recipe",
            RepoKind::RawSource => "raw-source",
            RepoKind::Master => "master",
            RepoKind::ProcessedOutput => "processed-output",
            RepoKind::Preferences => "preferences",
        }
    }

    /// Repos whose sessions must never show up in light-session queries.
    pub fn holds_derived_images(&self) -> bool {
        matches!(self, RepoKind::Master | RepoKind::ProcessedOutput)
    }
}

impl fmt::Display for RepoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RepoKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "recipe" => Ok(RepoKind::Recipe),
            "raw-source" | "raw" | "data" => Ok(RepoKind::RawSource),
            "master" | "masters" => Ok(RepoKind::Master),
            "processed-output" | "processed" => Ok(RepoKind::ProcessedOutput),
            "preferences" => Ok(RepoKind::Preferences),
            other => Err(format!("unknown repo kind: {other}")),
        }
    }
}

/// How a stage fans out over the selected sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Multiplex {
    /// One task total.
    Single,
    /// One task per light session.
    #[default]
    PerSession,
    /// One task per target.
    PerTarget,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_kind_round_trip() {
        for kind in [
            ImageKind::Light,
            ImageKind::Flat,
            ImageKind::MasterBias,
            ImageKind::MasterDark,
        ] {
            assert_eq!(kind.as_str().parse::<ImageKind>().unwrap(), kind);
        }
    }

    #[test]
    fn plural_aliases_parse() {
        assert_eq!("darks".parse::<ImageKind>().unwrap(), ImageKind::Dark);
        assert_eq!("biases".parse::<ImageKind>().unwrap(), ImageKind::Bias);
    }

    #[test]
    fn master_promotion_only_for_calibration_kinds() {
        assert_eq!(
            ImageKind::Flat.master_counterpart(),
            Some(ImageKind::MasterFlat)
        );
        assert_eq!(ImageKind::Light.master_counterpart(), None);
        assert_eq!(
            ImageKind::MasterDark.raw_counterpart(),
            ImageKind::Dark
        );
    }
}

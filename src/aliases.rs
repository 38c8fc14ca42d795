// src/aliases.rs

//! Normalization of target, filter and frame-kind labels.
//!
//! Capture software is wildly inconsistent about naming: the same duo-band
//! filter ships as `HaOiii`, `HA-OIII` or `Halpha-O3` depending on vendor.
//! An alias map (built-in defaults, extensible from repository documents)
//! folds all spellings onto one canonical label so sessions and calibration
//! lookups match across devices.

use std::collections::HashMap;

use serde::Deserialize;
use tracing::debug;

/// Canonical-label lookup built from `canonical -> [spellings]` entries.
#[derive(Debug, Clone, Default)]
pub struct Aliases {
    /// canonical -> accepted spellings (first entry is the canonical itself)
    alias_map: HashMap<String, Vec<String>>,
    /// lowercased spelling -> canonical
    reverse: HashMap<String, String>,
}

/// Shape of an `[aliases]` table in a repository document.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AliasTable(pub HashMap<String, Vec<String>>);

impl Aliases {
    pub fn new(map: HashMap<String, Vec<String>>) -> Self {
        let mut aliases = Self::default();
        for (canonical, spellings) in map {
            aliases.insert(canonical, spellings);
        }
        aliases
    }

    /// The built-in alias set; repository documents may extend it.
    pub fn with_defaults() -> Self {
        let mut map = HashMap::new();
        let defaults: &[(&str, &[&str])] = &[
            ("light", &["light", "lights", "LIGHT", "Light Frame"]),
            ("dark", &["dark", "darks", "DARK", "Dark Frame"]),
            ("flat", &["flat", "flats", "FLAT", "Flat Frame", "Flat Field"]),
            ("bias", &["bias", "biases", "BIAS", "offset", "Bias Frame"]),
            ("HaOiii", &["HaOiii", "HA-OIII", "Halpha-O3", "Ha/OIII"]),
            ("SiiOiii", &["SiiOiii", "SII-OIII", "S2-O3", "SII/OIII"]),
            ("LP", &["LP", "light-pollution", "CLS"]),
            ("VIS", &["VIS", "visible", "ir-cut"]),
        ];
        for (canonical, spellings) in defaults {
            map.insert(
                canonical.to_string(),
                spellings.iter().map(|s| s.to_string()).collect(),
            );
        }
        Self::new(map)
    }

    /// Add a canonical label with its spellings, extending any existing entry.
    pub fn insert(&mut self, canonical: String, spellings: Vec<String>) {
        self.reverse
            .insert(canonical.to_lowercase(), canonical.clone());
        for spelling in &spellings {
            self.reverse
                .insert(spelling.to_lowercase(), canonical.clone());
        }
        self.alias_map
            .entry(canonical)
            .or_default()
            .extend(spellings);
    }

    /// Fold additional alias tables (from repository documents) into this set.
    pub fn extend_from(&mut self, table: AliasTable) {
        for (canonical, spellings) in table.0 {
            debug!(canonical = %canonical, "extending alias map from repo document");
            self.insert(canonical, spellings);
        }
    }

    /// Spellings registered for a canonical label, if any.
    pub fn get(&self, canonical: &str) -> Option<&[String]> {
        self.alias_map.get(canonical).map(|v| v.as_slice())
    }

    /// Normalize a label to its canonical form.
    ///
    /// Unknown labels pass through with surrounding whitespace stripped; the
    /// alias map only ever folds spellings together, it never rejects.
    pub fn normalize(&self, label: &str) -> String {
        let trimmed = label.trim();
        match self.reverse.get(&trimmed.to_lowercase()) {
            Some(canonical) => canonical.clone(),
            None => trimmed.to_string(),
        }
    }
}

/// Normalize a target name: lowercase, whitespace removed.
///
/// `NGC 281` and `ngc281` must address the same target.
pub fn normalize_target(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duo_band_spellings_fold_together() {
        let aliases = Aliases::with_defaults();
        assert_eq!(aliases.normalize("HA-OIII"), "HaOiii");
        assert_eq!(aliases.normalize("Halpha-O3"), "HaOiii");
        assert_eq!(aliases.normalize("S2-O3"), "SiiOiii");
    }

    #[test]
    fn unknown_labels_pass_through() {
        let aliases = Aliases::with_defaults();
        assert_eq!(aliases.normalize(" UV-IR "), "UV-IR");
    }

    #[test]
    fn frame_kind_spellings() {
        let aliases = Aliases::with_defaults();
        assert_eq!(aliases.normalize("Dark Frame"), "dark");
        assert_eq!(aliases.normalize("OFFSET"), "bias");
    }

    #[test]
    fn repo_documents_extend_the_map() {
        let mut aliases = Aliases::with_defaults();
        let mut table = HashMap::new();
        table.insert("NBZ".to_string(), vec!["nbz-filter".to_string()]);
        aliases.extend_from(AliasTable(table));
        assert_eq!(aliases.normalize("nbz-filter"), "NBZ");
        // defaults survive the extension
        assert_eq!(aliases.normalize("darks"), "dark");
    }

    #[test]
    fn target_normalization_strips_whitespace_and_case() {
        assert_eq!(normalize_target("NGC 281"), "ngc281");
        assert_eq!(normalize_target("  Sadr "), "sadr");
    }
}

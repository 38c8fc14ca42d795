// src/builtin/mod.rs

//! Read-only repositories bundled into the binary, addressed as `pkg://<name>`.

/// Root document of the `pkg://defaults` recipe repository.
pub const DEFAULTS: &str = include_str!("defaults.toml");

/// Look up a bundled file: `repo` is the `pkg://` name, `file` a path inside
/// it (empty string means the repository's root document).
pub fn resource(repo: &str, file: &str) -> Option<&'static str> {
    match (repo, file) {
        ("defaults", "") | ("defaults", "starbash.toml") => Some(DEFAULTS),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resource_resolves() {
        assert!(resource("defaults", "").is_some());
        assert!(resource("defaults", "starbash.toml").is_some());
        assert!(resource("defaults", "missing.toml").is_none());
        assert!(resource("unknown", "").is_none());
    }

    #[test]
    fn defaults_document_parses() {
        let doc: toml::value::Table = toml::from_str(DEFAULTS).unwrap();
        assert_eq!(
            doc["repo"].as_table().unwrap()["kind"].as_str(),
            Some("recipe")
        );
        assert!(doc["stage"].as_array().unwrap().len() >= 8);
    }
}

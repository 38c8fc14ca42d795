// src/repo/url.rs

use std::fmt;
use std::path::PathBuf;

use crate::errors::{Result, StarbashError};

/// Parsed repository URL scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoUrl {
    /// `file:///path/to/repo` or a bare filesystem path.
    Local(PathBuf),
    /// `pkg://<name>` — read-only defaults bundled into the binary.
    Packaged(String),
    /// `http(s)://...` — fetched once and cached.
    Remote(String),
}

impl RepoUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        if let Some(path) = trimmed.strip_prefix("file://") {
            return Ok(RepoUrl::Local(PathBuf::from(path)));
        }
        if let Some(name) = trimmed.strip_prefix("pkg://") {
            return Ok(RepoUrl::Packaged(name.trim_matches('/').to_string()));
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Ok(RepoUrl::Remote(trimmed.to_string()));
        }
        if trimmed.contains("://") {
            return Err(StarbashError::UnknownScheme(trimmed.to_string()));
        }
        // Bare paths are a convenience for the driver.
        Ok(RepoUrl::Local(PathBuf::from(trimmed)))
    }

    /// Canonical URL string used as the repository id.
    pub fn canonical(&self) -> String {
        match self {
            RepoUrl::Local(path) => format!("file://{}", path.display()),
            RepoUrl::Packaged(name) => format!("pkg://{name}"),
            RepoUrl::Remote(url) => url.clone(),
        }
    }

    /// Filesystem root, for local repositories only.
    pub fn local_root(&self) -> Option<&PathBuf> {
        match self {
            RepoUrl::Local(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for RepoUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schemes_parse() {
        assert_eq!(
            RepoUrl::parse("file:///tmp/repo").unwrap(),
            RepoUrl::Local(PathBuf::from("/tmp/repo"))
        );
        assert_eq!(
            RepoUrl::parse("pkg://defaults").unwrap(),
            RepoUrl::Packaged("defaults".into())
        );
        assert!(matches!(
            RepoUrl::parse("https://example.org/recipes").unwrap(),
            RepoUrl::Remote(_)
        ));
    }

    #[test]
    fn bare_paths_are_local() {
        assert_eq!(
            RepoUrl::parse("/data/astro").unwrap(),
            RepoUrl::Local(PathBuf::from("/data/astro"))
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(matches!(
            RepoUrl::parse("ftp://example.org/x"),
            Err(StarbashError::UnknownScheme(_))
        ));
    }

    #[test]
    fn canonical_round_trip() {
        let url = RepoUrl::parse("/tmp/repo").unwrap();
        assert_eq!(url.canonical(), "file:///tmp/repo");
    }
}

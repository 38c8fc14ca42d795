// src/repo/mod.rs

//! Repository layer: rooted configuration trees with precedence and imports.
//!
//! A repository is identified by URL (`file://`, `pkg://`, `https://`), holds
//! one declarative TOML document, and gets a precedence rank from load order.

pub mod document;
pub mod imports;
pub mod manager;
pub mod remote;
pub mod url;

pub use document::Document;
pub use manager::{RepoManager, UnionItem};
pub use url::RepoUrl;

use std::path::{Component, Path, PathBuf};

use crate::errors::{Result, StarbashError};
use crate::types::RepoKind;

/// Canonical per-repository document filename.
pub const REPO_CONFIG_FILENAME: &str = "starbash.toml";

/// One loaded repository.
#[derive(Debug)]
pub struct Repo {
    /// Canonical URL; doubles as the repository id in the catalog.
    pub url: String,
    pub scheme: RepoUrl,
    pub kind: RepoKind,
    /// Load order; later repositories take precedence.
    pub rank: usize,
    pub doc: Document,
}

impl Repo {
    /// Filesystem root, for local repositories.
    pub fn root(&self) -> Option<&PathBuf> {
        self.scheme.local_root()
    }

    /// Read a file relative to this repository's root (e.g. a stage's
    /// `script-file`). Reads never escape the repository.
    pub fn read_file(&self, relative: &str, remote_cache_dir: &Path) -> Result<String> {
        read_repo_file(&self.scheme, relative, remote_cache_dir)
    }

    /// Per-kind relative output template: `repo.relative.<kind>` falling back
    /// to `repo.relative.default`.
    pub fn relative_template(&self, kind: &str) -> Option<&str> {
        self.doc
            .get_str(&format!("repo.relative.{kind}"))
            .or_else(|| self.doc.get_str("repo.relative.default"))
    }
}

/// Read a file from a repository identified by scheme.
///
/// Local reads refuse paths that climb out of the repository root; remote
/// repositories only expose their root document (served from the fetch
/// cache); packaged repositories resolve against the bundled resources.
pub(crate) fn read_repo_file(
    scheme: &RepoUrl,
    relative: &str,
    remote_cache_dir: &Path,
) -> Result<String> {
    match scheme {
        RepoUrl::Local(root) => {
            let rel = Path::new(relative);
            if rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir))
            {
                return Err(StarbashError::Other(anyhow::anyhow!(
                    "refusing to read '{relative}' outside repository root"
                )));
            }
            let path = root.join(rel);
            std::fs::read_to_string(&path).map_err(|_| StarbashError::MissingFile(path))
        }
        RepoUrl::Packaged(name) => {
            let file = if relative == REPO_CONFIG_FILENAME {
                ""
            } else {
                relative
            };
            crate::builtin::resource(name, file)
                .map(str::to_string)
                .ok_or_else(|| StarbashError::MissingFile(PathBuf::from(relative)))
        }
        RepoUrl::Remote(url) => {
            if relative != REPO_CONFIG_FILENAME {
                return Err(StarbashError::MissingFile(PathBuf::from(relative)));
            }
            remote::read_from_cache(url, remote_cache_dir)
        }
    }
}

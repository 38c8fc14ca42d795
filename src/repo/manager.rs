// src/repo/manager.rs

//! Loading and precedence: repositories load in order, later repositories win
//! single-value lookups, and the union view preserves every occurrence with a
//! back-pointer to its owning repository.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use toml::value::{Table, Value};
use tracing::{debug, info, warn};

use crate::aliases::{AliasTable, Aliases};
use crate::errors::{Result, StarbashError};
use crate::types::RepoKind;

use super::document::Document;
use super::imports::{resolve_document, FileSource, ROOT_FILE};
use super::url::RepoUrl;
use super::{read_repo_file, Repo, REPO_CONFIG_FILENAME};

/// One occurrence of a key in the union view.
#[derive(Debug, Clone)]
pub struct UnionItem {
    pub value: Value,
    pub repo: Arc<Repo>,
}

/// Ordered collection of loaded repositories.
pub struct RepoManager {
    repos: Vec<Arc<Repo>>,
    remote_cache_dir: PathBuf,
    client: reqwest::Client,
}

/// Sync file source for the import resolver, reading from any known scheme.
struct RepoFileSource<'a> {
    remote_cache_dir: &'a Path,
}

impl FileSource for RepoFileSource<'_> {
    fn load(&self, repo: &str, file: &str) -> Result<Table> {
        let url = RepoUrl::parse(repo)?;
        let file = if file == ROOT_FILE {
            REPO_CONFIG_FILENAME
        } else {
            file
        };
        let text = read_repo_file(&url, file, self.remote_cache_dir)?;
        Ok(toml::from_str(&text)?)
    }
}

impl RepoManager {
    pub fn new(remote_cache_dir: PathBuf) -> Self {
        Self {
            repos: Vec::new(),
            remote_cache_dir,
            client: reqwest::Client::new(),
        }
    }

    pub fn repos(&self) -> &[Arc<Repo>] {
        &self.repos
    }

    pub fn get_repo(&self, url: &str) -> Option<&Arc<Repo>> {
        self.repos.iter().find(|r| r.url == url)
    }

    /// First repository of the given kind, in precedence order (last wins).
    pub fn get_repo_by_kind(&self, kind: RepoKind) -> Option<&Arc<Repo>> {
        self.repos.iter().rev().find(|r| r.kind == kind)
    }

    /// Load a repository (and, transitively, anything its `repo-ref` entries
    /// name) and append it to the precedence order.
    pub async fn add_repo(&mut self, url: &str) -> Result<Arc<Repo>> {
        let parsed = RepoUrl::parse(url)?;
        let canonical = parsed.canonical();
        if let Some(existing) = self.get_repo(&canonical) {
            debug!(url = %canonical, "repo already loaded");
            return Ok(existing.clone());
        }

        let text = match &parsed {
            RepoUrl::Remote(remote_url) => {
                super::remote::fetch_cached(&self.client, remote_url, &self.remote_cache_dir)
                    .await?
            }
            _ => match read_repo_file(&parsed, REPO_CONFIG_FILENAME, &self.remote_cache_dir) {
                Ok(text) => text,
                Err(StarbashError::MissingFile(_)) => {
                    // A bare image directory is a legitimate raw-source repo.
                    warn!(url = %canonical, "no {REPO_CONFIG_FILENAME} found, treating as raw source");
                    String::new()
                }
                Err(err) => return Err(err),
            },
        };

        let mut root: Table = toml::from_str(&text)?;
        let source = RepoFileSource {
            remote_cache_dir: &self.remote_cache_dir,
        };
        resolve_document(&mut root, &canonical, &source)?;
        let doc = Document::from_table(root);

        let kind = match doc.get_str("repo.kind") {
            Some(kind_str) => kind_str
                .parse::<RepoKind>()
                .map_err(|e| StarbashError::Other(anyhow::anyhow!(e)))?,
            None => RepoKind::RawSource,
        };

        let repo = Arc::new(Repo {
            url: canonical.clone(),
            scheme: parsed,
            kind,
            rank: self.repos.len(),
            doc,
        });
        info!(url = %canonical, kind = %kind, rank = repo.rank, "repo loaded");
        self.repos.push(repo.clone());

        // Transitive references load depth-first, in document order.
        let refs = repo_refs(&repo);
        for reference in refs {
            Box::pin(self.add_repo(&reference)).await?;
        }

        Ok(repo)
    }

    /// Drop a repository from the precedence order.
    pub fn remove_repo(&mut self, url: &str) -> Result<()> {
        let canonical = RepoUrl::parse(url)?.canonical();
        let before = self.repos.len();
        self.repos.retain(|r| r.url != canonical);
        if self.repos.len() == before {
            return Err(StarbashError::Other(anyhow::anyhow!(
                "repository '{canonical}' is not loaded"
            )));
        }
        Ok(())
    }

    /// Last-loaded value for a dotted key, with its owning repository.
    pub fn get(&self, dotted: &str) -> Option<(&Value, &Arc<Repo>)> {
        for repo in self.repos.iter().rev() {
            if let Some(value) = repo.doc.get(dotted) {
                return Some((value, repo));
            }
        }
        None
    }

    pub fn get_str(&self, dotted: &str) -> Option<&str> {
        self.get(dotted).and_then(|(v, _)| v.as_str())
    }

    /// Every occurrence of a top-level key, in load order. Array values are
    /// flattened so each element carries its own repository back-pointer.
    pub fn union(&self, key: &str) -> Vec<UnionItem> {
        let mut items = Vec::new();
        for repo in &self.repos {
            match repo.doc.root().get(key) {
                Some(Value::Array(elements)) => {
                    for element in elements {
                        items.push(UnionItem {
                            value: element.clone(),
                            repo: repo.clone(),
                        });
                    }
                }
                Some(value) => items.push(UnionItem {
                    value: value.clone(),
                    repo: repo.clone(),
                }),
                None => {}
            }
        }
        items
    }

    /// Alias map folded across all repositories, defaults first.
    pub fn aliases(&self) -> Aliases {
        let mut aliases = Aliases::with_defaults();
        for item in self.union("aliases") {
            match item.value.clone().try_into::<AliasTable>() {
                Ok(table) => aliases.extend_from(table),
                Err(err) => warn!(
                    repo = %item.repo.url,
                    error = %err,
                    "ignoring malformed [aliases] table"
                ),
            }
        }
        aliases
    }
}

/// `repo-ref` entries of a document: `{ url = "..." }` or `{ dir = "..." }`
/// (relative dirs resolve against the repository root).
fn repo_refs(repo: &Repo) -> Vec<String> {
    let mut refs = Vec::new();
    let Some(entries) = repo.doc.get_array("repo-ref") else {
        return refs;
    };
    for entry in entries {
        let Some(table) = entry.as_table() else {
            warn!(repo = %repo.url, "ignoring non-table repo-ref entry");
            continue;
        };
        if let Some(url) = table.get("url").and_then(Value::as_str) {
            refs.push(url.to_string());
        } else if let Some(dir) = table.get("dir").and_then(Value::as_str) {
            let path = PathBuf::from(dir);
            let resolved = if path.is_absolute() {
                path
            } else if let Some(root) = repo.scheme.local_root() {
                root.join(path)
            } else {
                warn!(repo = %repo.url, dir, "relative repo-ref in non-local repo ignored");
                continue;
            };
            refs.push(format!("file://{}", resolved.display()));
        } else {
            warn!(repo = %repo.url, "repo-ref entry needs 'url' or 'dir'");
        }
    }
    refs
}

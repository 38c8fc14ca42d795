// src/paths.rs

//! On-disk layout of persistent engine state.
//!
//! Everything hangs off a single base directory so tests can point the whole
//! engine at a scratch dir. Resolution order for the base: explicit path from
//! the driver, then `STARBASH_HOME`, then `.starbash` under the home dir.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// Resolved directory layout for one engine instance.
#[derive(Debug, Clone)]
pub struct Layout {
    /// User-data root: catalog + selection state.
    pub data_dir: PathBuf,
    /// User-config root: `user.toml`.
    pub config_dir: PathBuf,
    /// Cache root: per-target workspaces + signature store.
    pub cache_dir: PathBuf,
    /// Documents root: masters and processed outputs.
    pub docs_dir: PathBuf,
}

impl Layout {
    /// Build a layout rooted at `base`, creating the directories.
    pub fn at(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        let layout = Self {
            data_dir: base.join("data"),
            config_dir: base.join("config"),
            cache_dir: base.join("cache"),
            docs_dir: base.join("documents"),
        };
        for dir in [
            &layout.data_dir,
            &layout.config_dir,
            &layout.cache_dir,
            &layout.docs_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating state directory {dir:?}"))?;
        }
        Ok(layout)
    }

    /// Resolve the default base directory.
    pub fn resolve_base(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(home) = std::env::var("STARBASH_HOME") {
            return PathBuf::from(home);
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".starbash")
    }

    pub fn catalog_db(&self) -> PathBuf {
        self.data_dir.join("catalog.db")
    }

    pub fn selection_file(&self) -> PathBuf {
        self.data_dir.join("selection.json")
    }

    pub fn user_config(&self) -> PathBuf {
        self.config_dir.join("user.toml")
    }

    pub fn signatures_db(&self) -> PathBuf {
        self.cache_dir.join("signatures.db")
    }

    /// Append-only run log capturing debug detail for every invocation.
    pub fn run_log(&self) -> PathBuf {
        self.cache_dir.join("logs").join("starbash.log")
    }

    /// Root for per-target processing workspaces.
    pub fn processing_dir(&self) -> PathBuf {
        self.cache_dir.join("processing")
    }

    /// Cache of fetched remote repository documents.
    pub fn remote_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("remote")
    }

    /// Where generated masters land: `masters/<camera-id>/<kind>/<file>`.
    pub fn masters_dir(&self) -> PathBuf {
        self.docs_dir.join("masters")
    }

    pub fn master_path(&self, camera_id: &str, kind: &str, filename: &str) -> PathBuf {
        self.masters_dir().join(camera_id).join(kind).join(filename)
    }

    /// Final outputs for one target, audit record alongside.
    pub fn processed_dir(&self, target: &str) -> PathBuf {
        self.docs_dir.join("processed").join(target)
    }

    pub fn audit_path(&self, target: &str) -> PathBuf {
        self.processed_dir(target).join(format!("{target}.audit.toml"))
    }
}

// src/exec/workspace.rs

//! Per-task workspaces under the cache root.
//!
//! Workspace names are deterministic so reruns reuse them; the cache root is
//! partitioned by target, with an LRU cap on how many target directories are
//! kept around.

use std::path::Path;

use anyhow::Context;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::graph::Task;

/// Create (or reuse) a task's workspace directory.
pub fn prepare(task: &Task) -> Result<()> {
    if task.workdir.exists() {
        debug!(task = %task.name, dir = %task.workdir.display(), "reusing workspace");
    } else {
        std::fs::create_dir_all(&task.workdir)
            .with_context(|| format!("creating workspace {:?}", task.workdir))?;
    }
    Ok(())
}

/// Symlink a file, falling back to a copy when symlinks are unavailable or
/// cross-device.
pub fn symlink_or_copy(src: &Path, dst: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        if std::os::unix::fs::symlink(src, dst).is_ok() {
            return Ok(());
        }
    }
    std::fs::copy(src, dst)
        .with_context(|| format!("copying {src:?} to {dst:?}"))?;
    Ok(())
}

/// Materialize a task's inputs into its workspace under their link names.
/// Reruns find the links already in place and skip them.
pub fn materialize_inputs(task: &Task) -> Result<()> {
    for input in &task.inputs {
        let dst = task.workdir.join(&input.link_name);
        if dst.exists() || dst.is_symlink() {
            continue;
        }
        symlink_or_copy(&input.path, &dst)?;
    }
    Ok(())
}

/// Copy declared outputs that the tool left in the workspace out to their
/// declared locations. Outputs written directly to their declared path (e.g.
/// by argv tools given an absolute output argument) are left alone.
pub fn collect_outputs(task: &Task) -> Result<()> {
    for output in &task.outputs {
        if output.exists() {
            continue;
        }
        let Some(name) = output.file_name() else {
            continue;
        };
        let produced = task.workdir.join(name);
        if produced.exists() {
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&produced, output).with_context(|| {
                format!("collecting output {produced:?} to {output:?}")
            })?;
        }
    }
    Ok(())
}

/// Enforce the cap on per-target workspace directories: oldest (by
/// modification time) are removed first.
pub fn enforce_lru(processing_dir: &Path, max_targets: usize) -> Result<()> {
    if !processing_dir.exists() {
        return Ok(());
    }
    let mut dirs: Vec<(std::time::SystemTime, std::path::PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(processing_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let modified = entry
            .metadata()?
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
        dirs.push((modified, entry.path()));
    }
    if dirs.len() <= max_targets {
        return Ok(());
    }

    dirs.sort_by_key(|(modified, _)| *modified);
    let excess = dirs.len() - max_targets;
    for (_, dir) in dirs.into_iter().take(excess) {
        warn!(dir = %dir.display(), "removing old processing workspace (LRU cap)");
        if let Err(err) = std::fs::remove_dir_all(&dir) {
            warn!(dir = %dir.display(), error = %err, "failed to remove old workspace");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn symlink_or_copy_materializes_content() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.fits");
        let dst = tmp.path().join("dst.fits");
        fs::write(&src, "payload").unwrap();

        symlink_or_copy(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(&dst).unwrap(), "payload");
    }

    #[test]
    fn lru_removes_oldest_directories() {
        let tmp = tempfile::tempdir().unwrap();
        for (name, age_secs) in [("old", 300), ("mid", 200), ("new", 100)] {
            let dir = tmp.path().join(name);
            fs::create_dir(&dir).unwrap();
            let mtime = std::time::SystemTime::now()
                - std::time::Duration::from_secs(age_secs);
            // Directory mtimes drive LRU ordering.
            let times = fs::FileTimes::new().set_modified(mtime);
            let handle = fs::File::open(&dir).unwrap();
            handle.set_times(times).unwrap();
        }

        enforce_lru(tmp.path(), 2).unwrap();
        assert!(!tmp.path().join("old").exists());
        assert!(tmp.path().join("mid").exists());
        assert!(tmp.path().join("new").exists());
    }
}

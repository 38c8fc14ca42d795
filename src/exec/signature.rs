// src/exec/signature.rs

//! Content-based up-to-date signatures.
//!
//! A task's signature covers the tool kind, the resolved command, a streamed
//! digest of every input file, and the declared output paths. Input order
//! does not matter; input content does.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use blake3::Hasher;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::errors::Result;
use crate::graph::Task;

/// Streamed blake3 digest of one file.
pub fn digest_file(path: &Path) -> Result<String> {
    let mut hasher = Hasher::new();
    let mut file =
        File::open(path).with_context(|| format!("opening input for hashing: {path:?}"))?;
    let mut buffer = [0u8; 8192];
    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Compute the up-to-date signature for a task.
pub fn compute_signature(task: &Task) -> Result<String> {
    let mut hasher = Hasher::new();
    hasher.update(task.action.signature_text().as_bytes());
    hasher.update(b"\n--inputs--\n");

    // Sort so declaration order cannot change the signature.
    let mut inputs: Vec<&Path> = task.input_paths().map(|p| p.as_path()).collect();
    inputs.sort();
    for input in inputs {
        hasher.update(input.display().to_string().as_bytes());
        hasher.update(b"=");
        hasher.update(digest_file(input)?.as_bytes());
        hasher.update(b"\n");
    }

    hasher.update(b"--outputs--\n");
    for output in &task.outputs {
        hasher.update(output.display().to_string().as_bytes());
        hasher.update(b"\n");
    }

    Ok(hasher.finalize().to_hex().to_string())
}

/// Persistent store of last-successful signatures, one row per task name.
#[derive(Debug, Clone)]
pub struct SignatureStore {
    pool: SqlitePool,
}

impl SignatureStore {
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signatures (
                task_name TEXT PRIMARY KEY,
                signature TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    pub async fn get(&self, task_name: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT signature FROM signatures WHERE task_name = ?")
            .bind(task_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("signature")))
    }

    /// Record a signature; only called on clean task exit so partial outputs
    /// are never mistaken for success.
    pub async fn set(&self, task_name: &str, signature: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO signatures (task_name, signature, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(task_name) DO UPDATE SET
                signature = excluded.signature,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(task_name)
        .bind(signature)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        debug!(task = task_name, "signature recorded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessingContext;
    use crate::graph::{TaskAction, TaskInput, ToolInvocation};
    use crate::stage::ToolKind;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn task_with_inputs(dir: &Path, inputs: Vec<(&str, &str)>) -> Task {
        let task_inputs = inputs
            .iter()
            .map(|(name, content)| {
                let path = dir.join(name);
                std::fs::write(&path, content).unwrap();
                TaskInput {
                    path,
                    link_name: name.to_string(),
                }
            })
            .collect();
        Task {
            name: "t".into(),
            stage_name: "s".into(),
            stage_long_name: "r#s".into(),
            target: "m31".into(),
            session_ids: vec![1],
            inputs: task_inputs,
            outputs: vec![PathBuf::from("/out/stacked.fits")],
            action: TaskAction::Tool(ToolInvocation {
                kind: ToolKind::Stacker,
                command: "stack".into(),
                args: Vec::new(),
                timeout_s: 60,
            }),
            workdir: dir.join("ws"),
            deps: BTreeSet::new(),
            min_outputs: 1,
            priority: 0,
            lenient_inputs: false,
            context: ProcessingContext::new(),
            publish_master: None,
        }
    }

    #[test]
    fn signature_is_input_order_insensitive() {
        let tmp = tempfile::tempdir().unwrap();
        let a = task_with_inputs(tmp.path(), vec![("a.fits", "A"), ("b.fits", "B")]);
        let mut b = task_with_inputs(tmp.path(), vec![("a.fits", "A"), ("b.fits", "B")]);
        b.inputs.reverse();
        assert_eq!(
            compute_signature(&a).unwrap(),
            compute_signature(&b).unwrap()
        );
    }

    #[test]
    fn signature_tracks_content_and_command() {
        let tmp = tempfile::tempdir().unwrap();
        let task = task_with_inputs(tmp.path(), vec![("a.fits", "A")]);
        let original = compute_signature(&task).unwrap();

        std::fs::write(tmp.path().join("a.fits"), "CHANGED").unwrap();
        let after_edit = compute_signature(&task).unwrap();
        assert_ne!(original, after_edit);

        let mut retooled = task.clone();
        retooled.action = TaskAction::Copy;
        assert_ne!(after_edit, compute_signature(&retooled).unwrap());
    }

    #[tokio::test]
    async fn store_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SignatureStore::open(&tmp.path().join("signatures.db"))
            .await
            .unwrap();
        assert_eq!(store.get("t").await.unwrap(), None);
        store.set("t", "abc").await.unwrap();
        assert_eq!(store.get("t").await.unwrap(), Some("abc".to_string()));
        store.set("t", "def").await.unwrap();
        assert_eq!(store.get("t").await.unwrap(), Some("def".to_string()));
    }
}

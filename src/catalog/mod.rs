// src/catalog/mod.rs

//! Metadata catalog: persistent indexed storage for image frames and the
//! session aggregates derived from them.
//!
//! Two tables: `images` (one row per physical frame, original header cards
//! kept as a JSON document) and `sessions` (pure function of `images`,
//! recomputed by [`Catalog::rebuild_sessions`]). The catalog is the sole
//! mutator of both tables; a single-connection pool serializes writes.

mod images;
mod sessions;

pub use images::{parse_instant, scrub_site_keys, ImageRecord};
pub use sessions::{CandidateQuery, SessionRow};

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::debug;

use crate::errors::Result;

/// Handle to the catalog database.
#[derive(Debug, Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Open (creating if needed) a catalog at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let catalog = Self { pool };
        catalog.init_schema().await?;
        debug!(path = %path.display(), "catalog opened");
        Ok(catalog)
    }

    /// Open an in-memory catalog (tests).
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let catalog = Self { pool };
        catalog.init_schema().await?;
        Ok(catalog)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE,
                repo_id TEXT NOT NULL,
                repo_kind TEXT NOT NULL,
                kind TEXT NOT NULL,
                observed TEXT NOT NULL,
                exposure_s REAL NOT NULL,
                gain INTEGER NOT NULL,
                binning INTEGER NOT NULL,
                filter TEXT NOT NULL,
                target TEXT NOT NULL,
                instrument TEXT NOT NULL,
                camera_id TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                bayer TEXT,
                temperature REAL,
                stack_count INTEGER NOT NULL DEFAULT 1,
                metadata TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_images_target_filter_kind
             ON images(target, filter, kind)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_observed ON images(observed)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_repo ON images(repo_id)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target TEXT NOT NULL,
                instrument TEXT NOT NULL,
                night TEXT NOT NULL,
                filter TEXT NOT NULL,
                kind TEXT NOT NULL,
                exposure_s REAL NOT NULL,
                gain INTEGER NOT NULL,
                binning INTEGER NOT NULL,
                frame_count INTEGER NOT NULL,
                total_exposure_s REAL NOT NULL,
                start TEXT NOT NULL,
                end TEXT NOT NULL,
                width INTEGER NOT NULL,
                height INTEGER NOT NULL,
                camera_id TEXT NOT NULL,
                bayer TEXT,
                derived INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_target ON sessions(target)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_kind ON sessions(kind)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

// src/app.rs

//! The engine's driver-facing surface: repository management, selection
//! mutation, info queries, and the two processing triggers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use chrono::Duration;
use tracing::{info, warn};

use crate::aliases::Aliases;
use crate::catalog::{CandidateQuery, Catalog, SessionRow};
use crate::errors::{Result, StarbashError};
use crate::exec::{cancel_flag, CancelFlag, ExecOptions, Executor, RunReport, SignatureStore};
use crate::graph::{self, BuildRequest};
use crate::ingest;
use crate::paths::Layout;
use crate::repo::{RepoManager, REPO_CONFIG_FILENAME};
use crate::score::{self, MasterKind, ScoredCandidate, GRACE_HOURS};
use crate::select::{QueryConditions, Selection};
use crate::stage;
use crate::tools::{Runner, ToolConfig};
use crate::types::ImageKind;
use crate::exec::workspace;

/// Seed document for a fresh preferences repository.
const USER_PREFS_TEMPLATE: &str = r#"# starbash user preferences repository
[repo]
kind = "preferences"

# Repositories to load, in precedence order (later wins):
# [[repo-ref]]
# dir = "/data/astro/raw"
"#;

/// Seed for a fresh `user.toml`.
const USER_CONFIG_TEMPLATE: &str = r#"# starbash user settings
[user]
# name = "Your Name"
# email = "you@example.org"

[analytics]
enabled = false

[log]
# Terminal verbosity when neither --log-level nor STARBASH_LOG is given:
# level = "debug"
"#;

/// User identity and preferences from `user.toml`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub user: UserIdentity,
    #[serde(default)]
    pub analytics: AnalyticsPrefs,
    #[serde(default)]
    pub log: LogPrefs,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct UserIdentity {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AnalyticsPrefs {
    #[serde(default)]
    pub enabled: bool,
}

/// `[log]` section: the user's standing terminal verbosity.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct LogPrefs {
    #[serde(default)]
    pub level: Option<String>,
}

impl UserConfig {
    /// Load `user.toml`, writing the template on first run.
    pub fn load_or_create(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            std::fs::write(path, USER_CONFIG_TEMPLATE)?;
            info!(path = %path.display(), "created user config");
        }
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Attribution label for audit records, when the user filled one in.
    pub fn identity_label(&self) -> Option<String> {
        match (&self.user.name, &self.user.email) {
            (Some(name), Some(email)) => Some(format!("{name} <{email}>")),
            (Some(name), None) => Some(name.clone()),
            (None, Some(email)) => Some(email.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Base state directory; `None` resolves `STARBASH_HOME` / `~/.starbash`.
    pub base_dir: Option<PathBuf>,
    /// Load the bundled `pkg://defaults` recipe repository.
    pub use_builtin_recipes: bool,
    /// Executor worker pool size.
    pub jobs: usize,
    /// LRU cap on per-target workspace directories.
    pub max_workspaces: usize,
    /// Default tool timeout, seconds.
    pub default_timeout_s: u64,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            base_dir: None,
            use_builtin_recipes: true,
            jobs: 1,
            max_workspaces: 8,
            default_timeout_s: 3600,
        }
    }
}

/// One running engine instance.
pub struct Starbash {
    pub layout: Layout,
    pub repos: RepoManager,
    pub catalog: Catalog,
    pub selection: Selection,
    pub aliases: Aliases,
    pub user: UserConfig,
    options: AppOptions,
    cancel: CancelFlag,
}

impl Starbash {
    pub async fn open(options: AppOptions) -> Result<Self> {
        let base = Layout::resolve_base(options.base_dir.as_deref());
        let layout = Layout::at(&base)?;
        let catalog = Catalog::open(&layout.catalog_db()).await?;
        let selection = Selection::load(&layout.selection_file());

        let mut repos = RepoManager::new(layout.remote_cache_dir());
        if options.use_builtin_recipes {
            repos.add_repo("pkg://defaults").await?;
        }

        // The preferences repo holds the user's repo-refs; create it on
        // first run so `repo add` has somewhere to persist.
        let prefs_doc = layout.config_dir.join(REPO_CONFIG_FILENAME);
        if !prefs_doc.exists() {
            std::fs::write(&prefs_doc, USER_PREFS_TEMPLATE)?;
            info!(path = %prefs_doc.display(), "created user preferences repo");
        }
        repos
            .add_repo(&format!("file://{}", layout.config_dir.display()))
            .await?;

        let user = UserConfig::load_or_create(&layout.user_config())?;
        let aliases = repos.aliases();
        info!(repos = repos.repos().len(), "engine initialized");

        Ok(Self {
            layout,
            repos,
            catalog,
            selection,
            aliases,
            user,
            options,
            cancel: cancel_flag(),
        })
    }

    /// Cooperative cancel handle for the driver's signal handler.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.cancel.clone()
    }

    // --- repository management ---

    /// Add a repository reference: persist it in the preferences repo, load
    /// it, and index its frames.
    pub async fn add_repo_ref(&mut self, url: &str) -> Result<()> {
        let repo = self.repos.add_repo(url).await?;
        self.persist_repo_ref(&repo.url, true)?;
        self.aliases = self.repos.aliases();
        let stats =
            ingest::reindex_repo(&self.catalog, &repo, &self.aliases, false).await?;
        self.catalog.rebuild_sessions().await?;
        info!(url = %repo.url, indexed = stats.indexed, "repository added");
        Ok(())
    }

    /// Remove a repository reference and every catalog row it owns.
    pub async fn remove_repo_ref(&mut self, url: &str) -> Result<()> {
        let canonical = crate::repo::RepoUrl::parse(url)?.canonical();
        self.repos.remove_repo(&canonical)?;
        self.persist_repo_ref(&canonical, false)?;
        let removed = self.catalog.remove_repo(&canonical).await?;
        self.aliases = self.repos.aliases();
        info!(url = %canonical, removed, "repository removed");
        Ok(())
    }

    /// Rewrite the preferences repo's `repo-ref` list.
    fn persist_repo_ref(&self, url: &str, add: bool) -> Result<()> {
        let prefs_doc = self.layout.config_dir.join(REPO_CONFIG_FILENAME);
        let text = std::fs::read_to_string(&prefs_doc).unwrap_or_default();
        let mut root: toml::value::Table = toml::from_str(&text)?;
        let refs = root
            .entry("repo-ref".to_string())
            .or_insert_with(|| toml::Value::Array(Vec::new()));
        let Some(array) = refs.as_array_mut() else {
            return Err(StarbashError::Other(anyhow::anyhow!(
                "repo-ref in {prefs_doc:?} is not an array"
            )));
        };
        array.retain(|entry| {
            entry
                .as_table()
                .and_then(|t| t.get("url"))
                .and_then(toml::Value::as_str)
                != Some(url)
        });
        if add {
            let mut entry = toml::value::Table::new();
            entry.insert("url".to_string(), toml::Value::String(url.to_string()));
            array.push(toml::Value::Table(entry));
        }
        let rendered = toml::to_string_pretty(&root)
            .map_err(|e| StarbashError::Other(e.into()))?;
        std::fs::write(&prefs_doc, rendered)?;
        Ok(())
    }

    /// Re-scan all image repositories and rebuild session aggregates.
    pub async fn reindex(&mut self, force: bool) -> Result<()> {
        for repo in self.repos.repos().to_vec() {
            ingest::reindex_repo(&self.catalog, &repo, &self.aliases, force).await?;
        }
        let inconsistencies = self.catalog.rebuild_sessions().await?;
        for err in &inconsistencies {
            warn!(error = %err, "session inconsistency during rebuild");
        }
        Ok(())
    }

    // --- info queries ---

    pub async fn info_targets(&self) -> Result<Vec<String>> {
        self.catalog
            .list_targets(&self.selection.to_query_conditions())
            .await
    }

    pub async fn info_instruments(&self) -> Result<Vec<String>> {
        self.catalog
            .list_instruments(&self.selection.to_query_conditions())
            .await
    }

    pub async fn info_filters(&self) -> Result<Vec<String>> {
        self.catalog
            .list_filters(&self.selection.to_query_conditions())
            .await
    }

    // --- processing triggers ---

    /// Full pipeline over the current selection: one graph per target.
    pub async fn process_auto(&mut self) -> Result<RunReport> {
        let conditions = self.selection.to_query_conditions();
        let light_sessions = self
            .catalog
            .search_sessions(&conditions, Some(ImageKind::Light))
            .await?;
        if light_sessions.is_empty() {
            info!("no light sessions under the current selection; no work");
            return Ok(RunReport::default());
        }

        let mut targets: Vec<String> =
            light_sessions.iter().map(|s| s.target.clone()).collect();
        targets.sort();
        targets.dedup();

        let runner = self.runner();
        for warning in runner.preflight() {
            warn!("{warning}");
        }

        let mut report = RunReport::default();
        for target in targets {
            if self.cancel.load(Ordering::SeqCst) {
                report.target_notes.push(format!("target '{target}' cancelled"));
                break;
            }
            let sessions: Vec<SessionRow> = light_sessions
                .iter()
                .filter(|s| s.target == target)
                .cloned()
                .collect();
            match self.process_target(&target, sessions, &runner).await {
                Ok(target_report) => report.merge(target_report),
                Err(err) => match err {
                    // Build errors skip one target; everything else aborts.
                    StarbashError::NoEligibleStage(_)
                    | StarbashError::MissingInputs { .. }
                    | StarbashError::GraphCycle(_) => {
                        warn!(target = %target, error = %err, "target skipped");
                        report.target_notes.push(format!("target '{target}': {err}"));
                        report.any_target_failed = true;
                    }
                    fatal => return Err(fatal),
                },
            }
        }
        Ok(report)
    }

    /// Build masters only: run the master-generation stages over every raw
    /// calibration session.
    pub async fn process_masters(&mut self) -> Result<RunReport> {
        let all = self
            .catalog
            .search_sessions(&QueryConditions::default(), None)
            .await?;
        let calibration: Vec<SessionRow> = all
            .into_iter()
            .filter(|s| {
                !s.derived
                    && matches!(
                        s.kind,
                        ImageKind::Flat | ImageKind::Dark | ImageKind::Bias
                    )
            })
            .collect();
        if calibration.is_empty() {
            info!("no calibration sessions found; no work");
            return Ok(RunReport::default());
        }

        let runner = self.runner();
        let stages: Vec<stage::BoundStage> = stage::collect_stages(&self.repos)
            .into_iter()
            .filter(|s| s.def.output_kind == stage::OutputKind::Master)
            .collect();
        let steps = stage::collect_steps(&self.repos);

        let session_frames = self.fetch_frames(&calibration).await?;
        let master_candidates = self.rank_masters(&calibration).await?;

        let request = BuildRequest {
            target: "masters".to_string(),
            sessions: calibration.clone(),
            calibration_sessions: calibration,
            session_frames,
            master_candidates,
            steps,
            stages,
            recipe: stage::recipe_meta(&self.repos),
            layout: &self.layout,
            default_timeout_s: self.options.default_timeout_s,
        };

        let graph = graph::build(&request)?;
        let store = SignatureStore::open(&self.layout.signatures_db()).await?;
        let executor = Executor::new(
            &self.catalog,
            &store,
            runner,
            ExecOptions {
                jobs: self.options.jobs,
            },
            self.cancel.clone(),
        );
        let report = executor.execute(&graph).await?;
        graph.audit.save(&self.layout.audit_path("masters"))?;
        Ok(report)
    }

    async fn process_target(
        &mut self,
        target: &str,
        sessions: Vec<SessionRow>,
        runner: &Runner,
    ) -> Result<RunReport> {
        info!(target, sessions = sessions.len(), "processing target");

        // Master lookup always searches the whole catalog, independent of
        // the user's selection.
        let all = self
            .catalog
            .search_sessions(&QueryConditions::default(), None)
            .await?;
        let calibration: Vec<SessionRow> = all
            .into_iter()
            .filter(|s| {
                !s.derived
                    && matches!(
                        s.kind,
                        ImageKind::Flat | ImageKind::Dark | ImageKind::Bias
                    )
            })
            .collect();

        let mut every_session = sessions.clone();
        every_session.extend(calibration.iter().cloned());
        let session_frames = self.fetch_frames(&every_session).await?;
        let master_candidates = self.rank_masters(&every_session).await?;

        let request = BuildRequest {
            target: target.to_string(),
            sessions,
            calibration_sessions: calibration,
            session_frames,
            master_candidates,
            steps: stage::collect_steps(&self.repos),
            stages: stage::collect_stages(&self.repos),
            recipe: stage::recipe_meta(&self.repos),
            layout: &self.layout,
            default_timeout_s: self.options.default_timeout_s,
        };

        let graph = graph::build(&request)?;
        workspace::enforce_lru(&self.layout.processing_dir(), self.options.max_workspaces)?;

        let store = SignatureStore::open(&self.layout.signatures_db()).await?;
        let executor = Executor::new(
            &self.catalog,
            &store,
            runner.clone(),
            ExecOptions {
                jobs: self.options.jobs,
            },
            self.cancel.clone(),
        );
        let report = executor.execute(&graph).await?;

        // The audit record lands next to the processed images, enriched with
        // any execution-time notes.
        let mut audit = graph.audit;
        audit.processed_by = self.user.identity_label();
        for row in &report.rows {
            if !row.note.is_empty() {
                audit.notes.push(format!("{}: {}", row.task, row.note));
            }
        }
        audit.tool_versions.insert(
            "stacker".to_string(),
            runner.config.stacker_program.clone(),
        );
        audit.tool_versions.insert(
            "image-tool".to_string(),
            runner.config.image_tool_program.clone(),
        );
        audit.save(&self.layout.audit_path(target))?;

        Ok(report)
    }

    fn runner(&self) -> Runner {
        Runner::new(ToolConfig::from_repos(&self.repos))
    }

    async fn fetch_frames(
        &self,
        sessions: &[SessionRow],
    ) -> Result<HashMap<i64, Vec<crate::catalog::ImageRecord>>> {
        let mut frames = HashMap::new();
        for session in sessions {
            frames.insert(session.id, self.catalog.session_images(session).await?);
        }
        Ok(frames)
    }

    /// Rank master candidates for every session and master kind.
    async fn rank_masters(
        &self,
        sessions: &[SessionRow],
    ) -> Result<HashMap<(i64, MasterKind), Vec<ScoredCandidate>>> {
        let mut ranked = HashMap::new();
        for session in sessions {
            let reference_temp = self
                .catalog
                .session_images(session)
                .await?
                .first()
                .and_then(|f| f.temperature);
            for kind in [
                MasterKind::Flat,
                MasterKind::Dark,
                MasterKind::Bias,
                MasterKind::DarkOrBias,
            ] {
                let mut candidates = Vec::new();
                for image_kind in kind.accepted_kinds() {
                    let query = self.candidate_query(session, kind, *image_kind);
                    candidates.extend(self.catalog.find_candidates(&query).await?);
                }
                let scored =
                    score::select_master(session, kind, &candidates, reference_temp);
                if !scored.is_empty() {
                    ranked.insert((session.id, kind), scored);
                }
            }
        }
        Ok(ranked)
    }

    fn candidate_query(
        &self,
        session: &SessionRow,
        kind: MasterKind,
        image_kind: ImageKind,
    ) -> CandidateQuery {
        let taken_before = session.start + Duration::hours(GRACE_HOURS);
        match kind {
            MasterKind::Flat => CandidateQuery {
                kind: image_kind,
                camera_id: None,
                instrument: Some(session.instrument.clone()),
                filter: Some(session.filter.clone()),
                width: session.width,
                height: session.height,
                gain: None,
                binning: None,
                exposure_s: None,
                taken_before,
            },
            MasterKind::Dark | MasterKind::Bias | MasterKind::DarkOrBias => CandidateQuery {
                kind: image_kind,
                camera_id: Some(session.camera_id.clone()),
                instrument: None,
                filter: None,
                width: session.width,
                height: session.height,
                gain: Some(session.gain),
                binning: Some(session.binning),
                exposure_s: (image_kind == ImageKind::MasterDark)
                    .then_some(session.exposure_s),
                taken_before,
            },
        }
    }
}

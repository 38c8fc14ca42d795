// src/repo/imports.rs

//! Import resolution for repository documents.
//!
//! A table containing an `import` sub-table is replaced (deep-copied) by the
//! referenced node; inside an array-of-tables the imported node merges into
//! the enclosing item with the item's own keys winning. The import spec:
//!
//! ```toml
//! [my_stage.import]
//! node = "library.stages.preprocessing"   # required, dotted path
//! file = "fragments/common.toml"          # optional, relative to the repo
//! repo = "file:///other/repo"             # optional, defaults to own repo
//! ```
//!
//! Imports nest (an imported node may itself contain imports, resolved in the
//! context of the file it came from); a cycle is fatal. Files are parsed once
//! per run and cached by (repo, file).

use std::collections::HashMap;

use anyhow::anyhow;
use toml::value::{Table, Value};
use tracing::debug;

use crate::errors::{Result, StarbashError};

use super::document::lookup_dotted;

/// Key used for the root document of a repo in the file cache ("" = root).
pub const ROOT_FILE: &str = "";

/// Provides parsed TOML files for the resolver.
///
/// `file` is a path relative to the repo root; [`ROOT_FILE`] means the repo's
/// root document. `repo` is a canonical repository URL.
pub trait FileSource {
    fn load(&self, repo: &str, file: &str) -> Result<Table>;
}

#[derive(Debug, Clone)]
struct ImportSpec {
    repo: Option<String>,
    file: Option<String>,
    node: String,
}

impl ImportSpec {
    fn parse(value: &Value) -> Result<Self> {
        let table = value.as_table().ok_or_else(|| {
            StarbashError::Other(anyhow!("'import' must be a table, got {value}"))
        })?;
        let node = table
            .get("node")
            .and_then(Value::as_str)
            .ok_or_else(|| StarbashError::Other(anyhow!("'import' must specify a 'node' key")))?
            .to_string();
        Ok(Self {
            repo: table.get("repo").and_then(Value::as_str).map(str::to_string),
            file: table.get("file").and_then(Value::as_str).map(str::to_string),
            node,
        })
    }
}

#[derive(Debug, Clone)]
struct Context {
    repo: String,
    file: String,
}

struct Resolver<'a> {
    source: &'a dyn FileSource,
    cache: HashMap<(String, String), Table>,
    /// Active `(repo, file, node)` resolutions, for cycle detection.
    stack: Vec<String>,
}

impl<'a> Resolver<'a> {
    fn pristine(&mut self, repo: &str, file: &str) -> Result<Table> {
        let key = (repo.to_string(), file.to_string());
        if let Some(table) = self.cache.get(&key) {
            return Ok(table.clone());
        }
        let table = self.source.load(repo, file)?;
        self.cache.insert(key, table.clone());
        Ok(table)
    }

    fn resolve_table(&mut self, table: &mut Table, ctx: &Context) -> Result<()> {
        let keys: Vec<String> = table.keys().cloned().collect();
        for key in keys {
            // Entries cannot vanish mid-walk; only their contents change.
            let value = table.get_mut(&key).expect("key present");
            self.resolve_value(value, ctx, false)?;
        }
        Ok(())
    }

    fn resolve_value(&mut self, value: &mut Value, ctx: &Context, in_array: bool) -> Result<()> {
        let import_spec = value
            .as_table()
            .and_then(|table| table.get("import"))
            .cloned();

        if let Some(spec_value) = import_spec {
            let spec = ImportSpec::parse(&spec_value)?;
            let node = self.fetch_node(&spec, ctx)?;
            if in_array {
                // Merge into the enclosing item; its own keys win.
                let node_table = node.as_table().cloned().ok_or_else(|| {
                    StarbashError::ImportTargetNotFound(format!(
                        "node '{}' is not a table, cannot merge into array item",
                        spec.node
                    ))
                })?;
                let own: Table = value
                    .as_table()
                    .expect("import spec came from a table")
                    .iter()
                    .filter(|(k, _)| k.as_str() != "import")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let mut merged = node_table;
                for (k, v) in own {
                    merged.insert(k, v);
                }
                *value = Value::Table(merged);
            } else {
                // Full replacement; sibling keys are dropped.
                *value = node;
            }
            return Ok(());
        }

        match value {
            Value::Table(table) => self.resolve_table(table, ctx)?,
            Value::Array(items) => {
                for item in items {
                    self.resolve_value(item, ctx, true)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn fetch_node(&mut self, spec: &ImportSpec, ctx: &Context) -> Result<Value> {
        let target_repo = spec.repo.clone().unwrap_or_else(|| ctx.repo.clone());
        // A cross-repo import without an explicit file reads that repo's root
        // document; a same-repo import defaults to the current file.
        let target_file = match (&spec.file, &spec.repo) {
            (Some(file), _) => file.clone(),
            (None, Some(_)) => ROOT_FILE.to_string(),
            (None, None) => ctx.file.clone(),
        };

        let stack_key = format!("{target_repo}::{target_file}::{}", spec.node);
        if self.stack.contains(&stack_key) {
            return Err(StarbashError::ImportCycle(stack_key));
        }
        self.stack.push(stack_key);

        let table = self.pristine(&target_repo, &target_file)?;
        let mut node = lookup_dotted(&table, &spec.node)
            .cloned()
            .ok_or_else(|| {
                StarbashError::ImportTargetNotFound(format!(
                    "node '{}' not found in path {target_repo}::{target_file}",
                    spec.node
                ))
            })?;

        // Nested imports resolve in the context of the file they came from.
        let node_ctx = Context {
            repo: target_repo,
            file: target_file,
        };
        self.resolve_value(&mut node, &node_ctx, false)?;

        self.stack.pop();
        Ok(node)
    }
}

/// Resolve all imports in a repository's root document, in place.
pub fn resolve_document(root: &mut Table, repo_url: &str, source: &dyn FileSource) -> Result<()> {
    if root.contains_key("import") {
        return Err(StarbashError::Other(anyhow!(
            "cannot use import at the root level of a repository document"
        )));
    }
    let mut resolver = Resolver {
        source,
        cache: HashMap::new(),
        stack: Vec::new(),
    };
    // Same-file imports look nodes up in the pristine parse.
    resolver
        .cache
        .insert((repo_url.to_string(), ROOT_FILE.to_string()), root.clone());

    let ctx = Context {
        repo: repo_url.to_string(),
        file: ROOT_FILE.to_string(),
    };
    resolver.resolve_table(root, &ctx)?;
    debug!(repo = %repo_url, files_read = resolver.cache.len(), "imports resolved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A FileSource over a fixed map of (repo, file) -> TOML text.
    struct MapSource(HashMap<(String, String), String>);

    impl MapSource {
        fn single(repo: &str, entries: &[(&str, &str)]) -> Self {
            let mut map = HashMap::new();
            for (file, text) in entries {
                map.insert((repo.to_string(), file.to_string()), text.to_string());
            }
            Self(map)
        }
    }

    impl FileSource for MapSource {
        fn load(&self, repo: &str, file: &str) -> Result<Table> {
            let text = self
                .0
                .get(&(repo.to_string(), file.to_string()))
                .ok_or_else(|| StarbashError::MissingFile(file.into()))?;
            Ok(toml::from_str(text)?)
        }
    }

    fn resolve(repo: &str, source: &MapSource) -> Result<Table> {
        let mut root = source.load(repo, ROOT_FILE)?;
        resolve_document(&mut root, repo, source)?;
        Ok(root)
    }

    #[test]
    fn same_file_import_replaces_table() {
        let source = MapSource::single(
            "r",
            &[(
                ROOT_FILE,
                r#"
                [base_stage]
                tool = "stacker"
                description = "base"

                [my_stage.import]
                node = "base_stage"
                "#,
            )],
        );
        let root = resolve("r", &source).unwrap();
        let my_stage = root["my_stage"].as_table().unwrap();
        assert!(!my_stage.contains_key("import"));
        assert_eq!(my_stage["tool"].as_str(), Some("stacker"));
    }

    #[test]
    fn import_from_other_file() {
        let source = MapSource::single(
            "r",
            &[
                (
                    ROOT_FILE,
                    r#"
                    [stage_one.import]
                    file = "library.toml"
                    node = "common"
                    "#,
                ),
                (
                    "library.toml",
                    r#"
                    [common]
                    tool = "image-tool"
                    context.mode = "background"
                    "#,
                ),
            ],
        );
        let root = resolve("r", &source).unwrap();
        let stage = root["stage_one"].as_table().unwrap();
        assert_eq!(stage["tool"].as_str(), Some("image-tool"));
        assert_eq!(
            stage["context"].as_table().unwrap()["mode"].as_str(),
            Some("background")
        );
    }

    #[test]
    fn nested_dotted_node() {
        let source = MapSource::single(
            "r",
            &[(
                ROOT_FILE,
                r#"
                [library.stages.preprocessing]
                tool = "stacker"

                [my_stage.import]
                node = "library.stages.preprocessing"
                "#,
            )],
        );
        let root = resolve("r", &source).unwrap();
        assert_eq!(
            root["my_stage"].as_table().unwrap()["tool"].as_str(),
            Some("stacker")
        );
    }

    #[test]
    fn array_items_merge_and_own_keys_win() {
        let source = MapSource::single(
            "r",
            &[(
                ROOT_FILE,
                r#"
                [base]
                tool = "stacker"
                priority = 10

                [[stage]]
                name = "calibrate"
                priority = 99
                [stage.import]
                node = "base"

                [[stage]]
                name = "stack"
                [stage.import]
                node = "base"
                "#,
            )],
        );
        let root = resolve("r", &source).unwrap();
        let stages = root["stage"].as_array().unwrap();
        assert_eq!(stages.len(), 2);
        let first = stages[0].as_table().unwrap();
        assert_eq!(first["name"].as_str(), Some("calibrate"));
        assert_eq!(first["tool"].as_str(), Some("stacker"));
        // own key wins over the imported one
        assert_eq!(first["priority"].as_integer(), Some(99));
        let second = stages[1].as_table().unwrap();
        assert_eq!(second["priority"].as_integer(), Some(10));
    }

    #[test]
    fn nested_imports_chain() {
        let source = MapSource::single(
            "r",
            &[
                (
                    ROOT_FILE,
                    r#"
                    [final.import]
                    file = "intermediate.toml"
                    node = "extended"
                    "#,
                ),
                (
                    "intermediate.toml",
                    r#"
                    [extended.import]
                    file = "base.toml"
                    node = "foundation"
                    "#,
                ),
                (
                    "base.toml",
                    r#"
                    [foundation]
                    tool = "stacker"
                    base_value = 1
                    "#,
                ),
            ],
        );
        let root = resolve("r", &source).unwrap();
        let node = root["final"].as_table().unwrap();
        assert_eq!(node["tool"].as_str(), Some("stacker"));
        assert_eq!(node["base_value"].as_integer(), Some(1));
    }

    #[test]
    fn resolution_is_idempotent() {
        let source = MapSource::single(
            "r",
            &[(
                ROOT_FILE,
                r#"
                [base]
                value = 1

                [copy.import]
                node = "base"
                "#,
            )],
        );
        let once = resolve("r", &source).unwrap();
        let mut twice = once.clone();
        resolve_document(&mut twice, "r", &source).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn cycle_is_fatal() {
        let source = MapSource::single(
            "r",
            &[
                (
                    ROOT_FILE,
                    r#"
                    [a.import]
                    file = "other.toml"
                    node = "b"
                    "#,
                ),
                (
                    "other.toml",
                    r#"
                    [b.import]
                    file = ""
                    node = "a"
                    "#,
                ),
            ],
        );
        let err = resolve("r", &source).unwrap_err();
        assert!(matches!(err, StarbashError::ImportCycle(_)), "{err}");
    }

    #[test]
    fn missing_node_is_reported() {
        let source = MapSource::single(
            "r",
            &[(
                ROOT_FILE,
                r#"
                [stage.import]
                node = "nonexistent.node"
                "#,
            )],
        );
        let err = resolve("r", &source).unwrap_err();
        assert!(matches!(err, StarbashError::ImportTargetNotFound(_)), "{err}");
    }

    #[test]
    fn import_spec_must_be_a_table_with_node() {
        let source = MapSource::single(
            "r",
            &[(
                ROOT_FILE,
                r#"
                [stage]
                import = "not-a-table"
                "#,
            )],
        );
        assert!(resolve("r", &source).is_err());

        let source = MapSource::single(
            "r",
            &[(
                ROOT_FILE,
                r#"
                [stage.import]
                file = "other.toml"
                "#,
            )],
        );
        assert!(resolve("r", &source).is_err());
    }

    #[test]
    fn root_level_import_is_rejected() {
        let source = MapSource::single(
            "r",
            &[(
                ROOT_FILE,
                r#"
                [some]
                value = 1

                [import]
                node = "some"
                "#,
            )],
        );
        assert!(resolve("r", &source).is_err());
    }
}

// tests/repo_precedence.rs

//! Repository layer behaviour through the manager: precedence, union view,
//! transitive references, alias folding, and script-file resolution.

use std::error::Error;

use starbash::repo::RepoManager;
use starbash::stage;
use starbash::types::RepoKind;

type TestResult = Result<(), Box<dyn Error>>;

fn write_repo(dir: &std::path::Path, doc: &str) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("starbash.toml"), doc).unwrap();
}

#[tokio::test]
async fn last_loaded_repo_wins_single_lookups() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_repo(
        &tmp.path().join("a"),
        r#"
        [repo]
        kind = "recipe"

        [tool.stacker]
        program = "siril-cli"
        "#,
    );
    write_repo(
        &tmp.path().join("b"),
        r#"
        [repo]
        kind = "recipe"

        [tool.stacker]
        program = "custom-stacker"
        "#,
    );

    let mut repos = RepoManager::new(tmp.path().join("cache"));
    repos
        .add_repo(&format!("file://{}", tmp.path().join("a").display()))
        .await?;
    repos
        .add_repo(&format!("file://{}", tmp.path().join("b").display()))
        .await?;

    assert_eq!(repos.get_str("tool.stacker.program"), Some("custom-stacker"));
    Ok(())
}

#[tokio::test]
async fn union_preserves_all_occurrences_with_backpointers() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_repo(
        &tmp.path().join("a"),
        r#"
        [repo]
        kind = "recipe"

        [[stage]]
        name = "from_a"
        when = "w"
        tool = { name = "script" }
        "#,
    );
    write_repo(
        &tmp.path().join("b"),
        r#"
        [repo]
        kind = "recipe"

        [[stage]]
        name = "from_b"
        when = "w"
        tool = { name = "script" }
        "#,
    );

    let mut repos = RepoManager::new(tmp.path().join("cache"));
    let url_a = format!("file://{}", tmp.path().join("a").display());
    let url_b = format!("file://{}", tmp.path().join("b").display());
    repos.add_repo(&url_a).await?;
    repos.add_repo(&url_b).await?;

    let stages = stage::collect_stages(&repos);
    assert_eq!(stages.len(), 2);
    assert_eq!(stages[0].def.name, "from_a");
    assert_eq!(stages[0].repo.url, url_a);
    assert_eq!(stages[1].def.name, "from_b");
    assert_eq!(stages[1].repo.url, url_b);
    Ok(())
}

#[tokio::test]
async fn repo_refs_load_transitively() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_repo(
        &tmp.path().join("library"),
        r#"
        [repo]
        kind = "recipe"
        "#,
    );
    write_repo(
        &tmp.path().join("main"),
        r#"
        [repo]
        kind = "recipe"

        [[repo-ref]]
        dir = "../library"
        "#,
    );

    let mut repos = RepoManager::new(tmp.path().join("cache"));
    repos
        .add_repo(&format!("file://{}", tmp.path().join("main").display()))
        .await?;

    assert_eq!(repos.repos().len(), 2);
    assert!(repos.repos()[1].url.ends_with("library"));
    Ok(())
}

#[tokio::test]
async fn alias_tables_fold_across_repos() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_repo(
        &tmp.path().join("a"),
        r#"
        [repo]
        kind = "recipe"

        [aliases]
        NBZ = ["nbz-filter", "NB-Z"]
        "#,
    );

    let mut repos = RepoManager::new(tmp.path().join("cache"));
    repos
        .add_repo(&format!("file://{}", tmp.path().join("a").display()))
        .await?;

    let aliases = repos.aliases();
    assert_eq!(aliases.normalize("NB-Z"), "NBZ");
    // built-in defaults still apply
    assert_eq!(aliases.normalize("HA-OIII"), "HaOiii");
    Ok(())
}

#[tokio::test]
async fn script_files_resolve_against_the_owning_repo() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("recipe");
    write_repo(
        &dir,
        r#"
        [repo]
        kind = "recipe"

        [[stage]]
        name = "stack"
        when = "final.stack"
        tool = { name = "stacker" }
        script-file = "scripts/stack.ssf"
        "#,
    );
    std::fs::create_dir_all(dir.join("scripts"))?;
    std::fs::write(dir.join("scripts/stack.ssf"), "stack light rej 3 3\n")?;

    let mut repos = RepoManager::new(tmp.path().join("cache"));
    repos
        .add_repo(&format!("file://{}", dir.display()))
        .await?;

    let stages = stage::collect_stages(&repos);
    assert_eq!(stages.len(), 1);
    let content = stages[0]
        .repo
        .read_file("scripts/stack.ssf", &tmp.path().join("cache"))?;
    assert!(content.contains("stack light"));

    assert_eq!(repos.repos()[0].kind, RepoKind::Recipe);
    Ok(())
}

#[tokio::test]
async fn per_kind_relative_templates_fall_back_to_default() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = tmp.path().join("masters");
    write_repo(
        &dir,
        r#"
        [repo]
        kind = "master"

        [repo.relative]
        default = "{camera_id}/misc/{session_config}.fits"
        bias = "{camera_id}/bias/master_bias_{date}.fits"
        "#,
    );

    let mut repos = RepoManager::new(tmp.path().join("cache"));
    repos.add_repo(&format!("file://{}", dir.display())).await?;

    let repo = repos.get_repo_by_kind(RepoKind::Master).unwrap();
    assert_eq!(
        repo.relative_template("bias"),
        Some("{camera_id}/bias/master_bias_{date}.fits")
    );
    assert_eq!(
        repo.relative_template("flat"),
        Some("{camera_id}/misc/{session_config}.fits")
    );
    Ok(())
}

#[tokio::test]
async fn unknown_scheme_is_a_configuration_error() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let mut repos = RepoManager::new(tmp.path().join("cache"));
    let err = repos.add_repo("ftp://example.org/repo").await.unwrap_err();
    assert!(matches!(
        err,
        starbash::errors::StarbashError::UnknownScheme(_)
    ));
    Ok(())
}

// tests/catalog_invariants.rs

//! Catalog invariants: idempotent ingestion, session aggregation rules,
//! repository removal round-trips, and master candidate queries.

mod common;

use std::error::Error;

use common::{make_repo, open_app, write_frame, write_lights, FrameSpec};
use starbash::catalog::parse_instant;
use starbash::select::QueryConditions;
use starbash::types::ImageKind;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn reindex_is_idempotent() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let raw = tmp.path().join("raw");
    make_repo(&raw, "raw-source");
    write_lights(&raw, 3, &FrameSpec::default());

    let mut app = open_app(&tmp.path().join("state")).await;
    app.add_repo_ref(&format!("file://{}", raw.display())).await?;

    let images = app.catalog.count_images().await?;
    let sessions = app.catalog.count_sessions().await?;
    assert_eq!(images, 3);
    assert_eq!(sessions, 1);

    app.reindex(false).await?;
    assert_eq!(app.catalog.count_images().await?, images);
    assert_eq!(app.catalog.count_sessions().await?, sessions);

    app.reindex(true).await?;
    assert_eq!(app.catalog.count_images().await?, images);
    assert_eq!(app.catalog.count_sessions().await?, sessions);
    Ok(())
}

#[tokio::test]
async fn sessions_share_required_attributes() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let raw = tmp.path().join("raw");
    make_repo(&raw, "raw-source");

    // Same target/night but two distinct gains: must split into two sessions.
    write_lights(&raw, 2, &FrameSpec::default());
    write_lights(
        &raw.join("gain200"),
        2,
        &FrameSpec {
            gain: 200,
            ..Default::default()
        },
    );

    let mut app = open_app(&tmp.path().join("state")).await;
    app.add_repo_ref(&format!("file://{}", raw.display())).await?;

    let sessions = app
        .catalog
        .search_sessions(&QueryConditions::default(), Some(ImageKind::Light))
        .await?;
    assert_eq!(sessions.len(), 2);

    for session in &sessions {
        let members = app.catalog.session_images(session).await?;
        assert!(!members.is_empty());
        for member in &members {
            assert_eq!(member.gain, session.gain);
            assert_eq!(member.binning, session.binning);
            assert_eq!(member.filter, session.filter);
            assert_eq!(member.kind, session.kind);
            assert_eq!(member.width, session.width);
            assert_eq!(member.height, session.height);
            assert!((member.exposure_s - session.exposure_s).abs() < 0.001);
        }
        assert_eq!(session.frame_count as usize, members.len());
    }
    Ok(())
}

#[tokio::test]
async fn add_reindex_remove_round_trips() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let keep = tmp.path().join("keep");
    let transient = tmp.path().join("transient");
    make_repo(&keep, "raw-source");
    make_repo(&transient, "raw-source");
    write_lights(&keep, 2, &FrameSpec::default());
    write_lights(
        &transient,
        2,
        &FrameSpec {
            target: "m31",
            ..Default::default()
        },
    );

    let mut app = open_app(&tmp.path().join("state")).await;
    app.add_repo_ref(&format!("file://{}", keep.display())).await?;

    let images_before = app.catalog.count_images().await?;
    let sessions_before = app.catalog.count_sessions().await?;

    let url = format!("file://{}", transient.display());
    app.add_repo_ref(&url).await?;
    assert!(app.catalog.count_images().await? > images_before);

    app.remove_repo_ref(&url).await?;
    assert_eq!(app.catalog.count_images().await?, images_before);
    assert_eq!(app.catalog.count_sessions().await?, sessions_before);
    Ok(())
}

#[tokio::test]
async fn frames_in_master_repos_are_promoted() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let masters = tmp.path().join("masters");
    make_repo(&masters, "master");
    write_frame(
        &masters.join("bias.fits"),
        &FrameSpec {
            kind: "bias",
            target: "",
            filter: "",
            exposure: 0.001,
            ..Default::default()
        },
    );

    let mut app = open_app(&tmp.path().join("state")).await;
    app.add_repo_ref(&format!("file://{}", masters.display())).await?;

    let record = app
        .catalog
        .get_image(&masters.join("bias.fits").display().to_string())
        .await?
        .expect("bias indexed");
    assert_eq!(record.kind, ImageKind::MasterBias);

    // Pre-stacked calibration frames promote too, wherever they live.
    let raw = tmp.path().join("raw");
    make_repo(&raw, "raw-source");
    write_frame(
        &raw.join("dark_stacked.fits"),
        &FrameSpec {
            kind: "dark",
            target: "",
            filter: "",
            stack: 16,
            ..Default::default()
        },
    );
    app.add_repo_ref(&format!("file://{}", raw.display())).await?;
    let record = app
        .catalog
        .get_image(&raw.join("dark_stacked.fits").display().to_string())
        .await?
        .expect("dark indexed");
    assert_eq!(record.kind, ImageKind::MasterDark);
    Ok(())
}

#[tokio::test]
async fn light_queries_exclude_sessions_from_derived_repos() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let processed = tmp.path().join("processed");
    make_repo(&processed, "processed-output");
    write_lights(&processed, 2, &FrameSpec::default());

    let mut app = open_app(&tmp.path().join("state")).await;
    app.add_repo_ref(&format!("file://{}", processed.display())).await?;

    let lights = app
        .catalog
        .search_sessions(&QueryConditions::default(), Some(ImageKind::Light))
        .await?;
    assert!(lights.is_empty(), "derived sessions leaked into light query");

    // The session itself still exists for non-light queries.
    assert_eq!(app.catalog.count_sessions().await?, 1);
    Ok(())
}

#[tokio::test]
async fn candidate_query_honours_the_grace_window() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let masters = tmp.path().join("masters");
    make_repo(&masters, "master");
    for (name, date) in [
        ("bias_early.fits", "2025-07-10T22:00:00"),
        ("bias_late.fits", "2025-07-20T22:00:00"),
    ] {
        write_frame(
            &masters.join(name),
            &FrameSpec {
                kind: "bias",
                target: "",
                filter: "",
                date,
                exposure: 0.001,
                ..Default::default()
            },
        );
    }

    let mut app = open_app(&tmp.path().join("state")).await;
    app.add_repo_ref(&format!("file://{}", masters.display())).await?;

    let query = starbash::catalog::CandidateQuery {
        kind: ImageKind::MasterBias,
        camera_id: Some("IMX462".into()),
        instrument: None,
        filter: None,
        width: 1080,
        height: 1920,
        gain: Some(80),
        binning: Some(1),
        exposure_s: None,
        taken_before: parse_instant("2025-07-16T22:00:00").unwrap(),
    };
    let candidates = app.catalog.find_candidates(&query).await?;
    assert_eq!(candidates.len(), 1);
    assert!(candidates[0].path.ends_with("bias_early.fits"));
    Ok(())
}

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ark::cache::MemoryRemoteCache;
use ark::engine::{BuildWalker, VisitResult, WalkOptions};
use ark::errors::ArkError;
use ark::target::{Address, KindRegistry};
use ark::workspace::Workspace;
use ark_test_utils::builders::write_file;
use ark_test_utils::{BuildLog, RecordingKind, WorkspaceBuilder, init_tracing, with_timeout};
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

/// `app.recording.a -> app.recording.b -> app.recording.c`, each with its own
/// source directory.
fn chain_workspace() -> tempfile::TempDir {
    WorkspaceBuilder::new()
        .file("app/a/main.txt", "a")
        .file("app/b/lib.txt", "b")
        .file("app/c/base.txt", "c")
        .target(
            "app",
            "recording",
            "a",
            r#"source_files = ["a"]
depends_on = ["app.recording.b"]"#,
        )
        .target(
            "app",
            "recording",
            "b",
            r#"source_files = ["b"]
depends_on = ["app.recording.c"]"#,
        )
        .target("app", "recording", "c", r#"source_files = ["c"]"#)
        .build()
}

fn load(root: &Path, kind: RecordingKind) -> Result<Workspace, ArkError> {
    let mut kinds = KindRegistry::with_builtins();
    kinds.register(Arc::new(kind));
    Workspace::load_with_kinds(root, &kinds)
}

fn addr(s: &str) -> Address {
    Address::parse(s).unwrap()
}

async fn build(
    root: &Path,
    log: &Arc<BuildLog>,
    walker: BuildWalker,
) -> Result<Vec<(Address, VisitResult)>, ArkError> {
    let ws = load(root, RecordingKind::new(Arc::clone(log)))?;
    let cancel = CancellationToken::new();
    let report = ws
        .build(Some(&addr("app.recording.a")), walker, WalkOptions::default(), &cancel)
        .await?;
    Ok(report.completed)
}

#[tokio::test]
async fn cold_build_runs_each_target_once_in_dependency_order() -> TestResult {
    init_tracing();
    let dir = chain_workspace();
    let log = Arc::new(BuildLog::default());

    let results = with_timeout(build(dir.path(), &log, BuildWalker::default())).await?;

    assert_eq!(
        log.order(),
        vec!["app.recording.c", "app.recording.b", "app.recording.a"]
    );
    assert!(results.iter().all(|(_, r)| *r == VisitResult::Built));

    // Second run with no changes builds nothing.
    let results = with_timeout(build(dir.path(), &log, BuildWalker::default())).await?;
    assert_eq!(log.count(), 3);
    assert!(results.iter().all(|(_, r)| *r == VisitResult::LocalHit));
    Ok(())
}

#[tokio::test]
async fn force_rebuilds_everything() -> TestResult {
    init_tracing();
    let dir = chain_workspace();
    let log = Arc::new(BuildLog::default());

    with_timeout(build(dir.path(), &log, BuildWalker::default())).await?;
    let forced = BuildWalker {
        force: true,
        ..BuildWalker::default()
    };
    let results = with_timeout(build(dir.path(), &log, forced)).await?;

    assert_eq!(log.count(), 6);
    assert_eq!(
        log.order()[3..].to_vec(),
        vec!["app.recording.c", "app.recording.b", "app.recording.a"]
    );
    assert!(results.iter().all(|(_, r)| *r == VisitResult::Built));
    Ok(())
}

#[tokio::test]
async fn source_change_rebuilds_only_the_affected_chain() -> TestResult {
    init_tracing();
    let dir = chain_workspace();
    let log = Arc::new(BuildLog::default());

    with_timeout(build(dir.path(), &log, BuildWalker::default())).await?;
    write_file(dir.path(), "app/b/lib.txt", "b changed");

    let results = with_timeout(build(dir.path(), &log, BuildWalker::default())).await?;

    assert_eq!(log.order()[3..].to_vec(), vec!["app.recording.b", "app.recording.a"]);
    let c = results
        .iter()
        .find(|(a, _)| a.as_str() == "app.recording.c")
        .map(|(_, r)| *r);
    assert_eq!(c, Some(VisitResult::LocalHit));
    Ok(())
}

#[tokio::test]
async fn committed_artifact_holds_build_output() -> TestResult {
    init_tracing();
    let dir = chain_workspace();
    let log = Arc::new(BuildLog::default());
    let ws = load(dir.path(), RecordingKind::new(Arc::clone(&log)))?;
    let cancel = CancellationToken::new();

    let c = addr("app.recording.c");
    with_timeout(ws.build(Some(&c), BuildWalker::default(), WalkOptions::default(), &cancel)).await?;

    let target = ws.graph().lookup_by_address(&c)?;
    let hash = target.computed_hash().expect("pre-built").to_string();
    let out = ws.local_cache().artifact_dir(&c, &hash).join("out.txt");
    assert_eq!(std::fs::read_to_string(out)?, "app.recording.c");
    assert!(ws.local_cache().check(&c, &hash)?);
    Ok(())
}

#[tokio::test]
async fn failure_skips_dependents_but_not_independent_chains() -> TestResult {
    init_tracing();
    let dir = WorkspaceBuilder::new()
        .target("app", "recording", "top", r#"depends_on = ["app.recording.bad", "app.recording.good"]"#)
        .target("app", "recording", "bad", "")
        .target("app", "recording", "good", "")
        .target("app", "recording", "after_bad", r#"depends_on = ["app.recording.bad"]"#)
        .build();
    let log = Arc::new(BuildLog::default());
    let ws = load(
        dir.path(),
        RecordingKind::new(Arc::clone(&log)).failing("app.recording.bad"),
    )?;
    let cancel = CancellationToken::new();

    let err = with_timeout(ws.build(None, BuildWalker::default(), WalkOptions::default(), &cancel))
        .await
        .unwrap_err();

    assert!(matches!(err, ArkError::BuildError { ref address, .. } if address == "app.recording.bad"));
    let order = log.order();
    assert!(order.contains(&"app.recording.good".to_string()));
    assert!(!order.contains(&"app.recording.top".to_string()));
    assert!(!order.contains(&"app.recording.after_bad".to_string()));
    Ok(())
}

#[tokio::test]
async fn concurrency_limit_is_respected() -> TestResult {
    init_tracing();
    let mut builder = WorkspaceBuilder::new().raw("[workspace]\nconcurrency = 2");
    for i in 0..6 {
        builder = builder.target("app", "recording", &format!("t{i}"), "");
    }
    let dir = builder.build();
    let log = Arc::new(BuildLog::default());
    let ws = load(
        dir.path(),
        RecordingKind::new(Arc::clone(&log)).delay(Duration::from_millis(50)),
    )?;
    let cancel = CancellationToken::new();

    with_timeout(ws.build(None, BuildWalker::default(), ws.walk_options(false), &cancel)).await?;

    assert_eq!(log.count(), 6);
    assert!(log.max_in_flight() <= 2);
    assert!(log.max_in_flight() >= 1);
    Ok(())
}

#[tokio::test]
async fn cancel_stops_dispatch_and_reports_cancelled() -> TestResult {
    init_tracing();
    let dir = chain_workspace();
    let log = Arc::new(BuildLog::default());
    let ws = load(
        dir.path(),
        RecordingKind::new(Arc::clone(&log)).delay(Duration::from_secs(30)),
    )?;
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = with_timeout(ws.build(
        Some(&addr("app.recording.a")),
        BuildWalker::default(),
        WalkOptions::default(),
        &cancel,
    ))
    .await
    .unwrap_err();

    assert!(matches!(err, ArkError::Cancelled));
    // Only the leaf was dispatched; its build saw the cancellation.
    assert_eq!(log.order(), vec!["app.recording.c"]);
    let c = addr("app.recording.c");
    let hash = ws.graph().lookup_by_address(&c)?.computed_hash().map(str::to_string);
    if let Some(hash) = hash {
        assert!(!ws.local_cache().check(&c, &hash)?);
    }
    Ok(())
}

#[tokio::test]
async fn group_targets_are_visited_but_not_built() -> TestResult {
    init_tracing();
    let dir = WorkspaceBuilder::new()
        .target("app", "group", "all", r#"depends_on = ["app.recording.x"]"#)
        .target("app", "recording", "x", "")
        .build();
    let log = Arc::new(BuildLog::default());
    let ws = load(dir.path(), RecordingKind::new(Arc::clone(&log)))?;
    let cancel = CancellationToken::new();

    let report = with_timeout(ws.build(
        Some(&addr("app.group.all")),
        BuildWalker::default(),
        WalkOptions::default(),
        &cancel,
    ))
    .await?;

    assert_eq!(log.order(), vec!["app.recording.x"]);
    let order: Vec<&str> = report.visit_order().into_iter().map(|a| a.as_str()).collect();
    assert_eq!(order, vec!["app.recording.x", "app.group.all"]);
    assert_eq!(report.completed[1].1, VisitResult::Skipped);
    Ok(())
}

#[tokio::test]
async fn local_miss_with_remote_hit_pulls_instead_of_building() -> TestResult {
    init_tracing();
    let dir = chain_workspace();
    let log = Arc::new(BuildLog::default());
    let remote = Arc::new(MemoryRemoteCache::new());
    let cancel = CancellationToken::new();
    let top = addr("app.recording.a");

    let ws = load(dir.path(), RecordingKind::new(Arc::clone(&log)))?.with_remote_cache(remote.clone());
    let push = BuildWalker {
        push: true,
        ..BuildWalker::default()
    };
    with_timeout(ws.build(Some(&top), push, WalkOptions::default(), &cancel)).await?;
    assert_eq!(log.count(), 3);
    assert_eq!(remote.put_count(), 3);
    ws.clean()?;

    let ws = load(dir.path(), RecordingKind::new(Arc::clone(&log)))?.with_remote_cache(remote.clone());
    let pull = BuildWalker {
        pull: true,
        ..BuildWalker::default()
    };
    let report = with_timeout(ws.build(Some(&top), pull, WalkOptions::default(), &cancel)).await?;
    assert_eq!(log.count(), 3);
    assert_eq!(report.completed.len(), 3);
    assert!(report.completed.iter().all(|(_, r)| *r == VisitResult::RemoteHit));

    // Pulled artifacts are committed locally.
    let report = with_timeout(ws.build(Some(&top), pull, WalkOptions::default(), &cancel)).await?;
    assert!(report.completed.iter().all(|(_, r)| *r == VisitResult::LocalHit));
    assert_eq!(log.count(), 3);
    Ok(())
}

#[tokio::test]
async fn local_miss_with_remote_miss_builds() -> TestResult {
    init_tracing();
    let dir = chain_workspace();
    let log = Arc::new(BuildLog::default());
    let remote = Arc::new(MemoryRemoteCache::new());
    let cancel = CancellationToken::new();

    let ws = load(dir.path(), RecordingKind::new(Arc::clone(&log)))?.with_remote_cache(remote.clone());
    let pull = BuildWalker {
        pull: true,
        ..BuildWalker::default()
    };
    let report = with_timeout(ws.build(Some(&addr("app.recording.a")), pull, WalkOptions::default(), &cancel)).await?;
    assert!(report.completed.iter().all(|(_, r)| *r == VisitResult::Built));
    assert_eq!(log.count(), 3);
    assert!(remote.is_empty());
    Ok(())
}

use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ark::commands;
use ark::engine::{BuildWalker, WalkOptions};
use ark::supervisor::{ChangeApplier, Supervisor, SupervisorOptions};
use ark::sync::{ChangeHandler, SyncServer};
use ark::target::Address;
use ark::types::RestartMode;
use ark::workspace::Workspace;
use ark_test_utils::builders::write_file;
use ark_test_utils::{WorkspaceBuilder, init_tracing};
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

fn fast_options() -> SupervisorOptions {
    SupervisorOptions {
        backoff_floor: Duration::from_millis(50),
        backoff_cap: Duration::from_millis(200),
        healthy_after: Duration::from_secs(30),
        grace: Duration::from_secs(2),
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap_or_default()
}

#[tokio::test]
async fn watch_streams_a_change_runs_its_action_and_restarts_once() -> TestResult {
    init_tracing();
    let remote = tempfile::tempdir()?;
    let cancel = CancellationToken::new();

    // Entrypoint side: supervisor + sync server applying into `remote`.
    let supervisor = Supervisor::new(
        vec!["sh".into(), "-c".into(), "sleep 30".into()],
        RestartMode::Auto,
    )?
    .with_options(fast_options());
    let starts: Arc<AtomicUsize> = supervisor.start_counter();
    let applier = ChangeApplier::new(Some(remote.path().to_path_buf()), RestartMode::Auto)
        .with_stop_handle(supervisor.stop_handle());
    let handler: Arc<dyn ChangeHandler> = Arc::new(applier);
    let server = SyncServer::bind("127.0.0.1:0").await?;
    let endpoint = server.local_addr()?.to_string();
    tokio::spawn(server.serve(handler, cancel.child_token()));
    let supervised = tokio::spawn(supervisor.watch(cancel.child_token()));
    wait_for("first child start", || starts.load(Ordering::SeqCst) == 1).await;

    // Developer side.
    let dir = WorkspaceBuilder::new()
        .raw("[workspace]\ncoalesce_ms = 20\n\n[package.app]\ndir = \".\"")
        .file("src/index.ts", "v1")
        .file("README.md", "docs")
        .target(
            "app",
            "live_sync",
            "dev",
            &format!(
                r#"source_files = ["src"]
endpoint = "{endpoint}"
restart_mode = "auto"
actions = [{{ command = ["sh", "-c", "echo ran >> actions.log"], patterns = ["src/**/*.ts"] }}]"#
            ),
        )
        .build();
    let ws = Workspace::load(dir.path())?;
    let address = Address::parse("app.live_sync.dev")?;
    ws.build(Some(&address), BuildWalker::default(), WalkOptions::default(), &cancel)
        .await?;

    let watch_cancel = cancel.child_token();
    let watching = commands::watch(&ws, &address, false, &watch_cancel);
    let driver = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Atomic replace so the observer never sees a half-written file.
        write_file(dir.path(), "index.ts.tmp", "v2");
        std::fs::rename(dir.path().join("index.ts.tmp"), dir.path().join("src/index.ts")).unwrap();
        // Outside the target's sources: must not be synced.
        write_file(dir.path(), "README.md", "docs v2");

        wait_for("synced file", || read(&remote.path().join("src/index.ts")) == "v2").await;
        wait_for("action output", || read(&remote.path().join("actions.log")) == "ran\n").await;
        wait_for("restart", || starts.load(Ordering::SeqCst) == 2).await;
        // Give a stray second notification a chance to show up.
        tokio::time::sleep(Duration::from_millis(300)).await;
        watch_cancel.cancel();
    };
    let (stats, ()) = tokio::join!(watching, driver);
    let stats = stats?;

    assert_eq!(stats.sent, 1);
    assert_eq!(read(&remote.path().join("actions.log")), "ran\n");
    assert!(!remote.path().join("README.md").exists());
    assert_eq!(starts.load(Ordering::SeqCst), 2);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), supervised).await???;
    Ok(())
}

#[tokio::test]
async fn cancel_interrupts_a_send_waiting_for_its_ack() -> TestResult {
    init_tracing();
    // A peer that reads one frame and never acks it.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let endpoint = listener.local_addr()?.to_string();
    let frames = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&frames);
    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let mut reader = tokio::io::BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        seen.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok::<_, std::io::Error>(reader)
    });

    let dir = WorkspaceBuilder::new()
        .raw("[workspace]\ncoalesce_ms = 20\n\n[package.app]\ndir = \".\"")
        .file("src/index.ts", "v1")
        .target(
            "app",
            "live_sync",
            "dev",
            &format!("source_files = [\"src\"]\nendpoint = \"{endpoint}\""),
        )
        .build();
    let ws = Workspace::load(dir.path())?;
    let address = Address::parse("app.live_sync.dev")?;
    let cancel = CancellationToken::new();
    ws.build(Some(&address), BuildWalker::default(), WalkOptions::default(), &cancel)
        .await?;

    let watching = commands::watch(&ws, &address, false, &cancel);
    let driver = async {
        tokio::time::sleep(Duration::from_millis(200)).await;
        write_file(dir.path(), "index.ts.tmp", "v2");
        std::fs::rename(dir.path().join("index.ts.tmp"), dir.path().join("src/index.ts")).unwrap();
        wait_for("frame at the peer", || frames.load(Ordering::SeqCst) == 1).await;
        cancel.cancel();
    };
    let (stats, ()) = tokio::time::timeout(Duration::from_secs(15), async {
        tokio::join!(watching, driver)
    })
    .await?;
    let stats = stats?;

    assert_eq!(stats.sent, 0);
    peer.abort();
    Ok(())
}

#[tokio::test]
async fn watch_requires_a_live_sync_target() -> TestResult {
    init_tracing();
    let dir = WorkspaceBuilder::new()
        .target("app", "group", "all", "")
        .build();
    let ws = Workspace::load(dir.path())?;
    let cancel = CancellationToken::new();

    let err = commands::watch(&ws, &Address::parse("app.group.all")?, false, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ark::errors::ArkError::ConfigError(_)));
    Ok(())
}

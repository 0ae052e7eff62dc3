use std::error::Error;
use std::path::Path;
use std::sync::Arc;

use ark::actions::Action;
use ark::archive::{gzip_tar_files, gzip_untar};
use ark::errors::ArkError;
use ark::observer::{ChangeNotification, File, FileType};
use ark::supervisor::ChangeApplier;
use ark::sync::{ChangeHandler, SyncClient, SyncServer};
use ark::types::RestartMode;
use ark_test_utils::builders::write_file;
use ark_test_utils::{init_tracing, with_timeout};
use flate2::Compression;
use flate2::write::GzEncoder;
use tokio_util::sync::CancellationToken;

type TestResult = Result<(), Box<dyn Error>>;

/// gzip(tar) with a single entry whose raw header name is `name`; the tar
/// builder API refuses `..`, so the header is filled in by hand.
fn archive_with_raw_name(name: &str, contents: &[u8]) -> Vec<u8> {
    let mut header = tar::Header::new_old();
    {
        let raw = &mut header.as_old_mut().name;
        raw[..name.len()].copy_from_slice(name.as_bytes());
    }
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_entry_type(tar::EntryType::Regular);
    header.set_cksum();

    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.append(&header, contents).unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

fn changed(rel: &str) -> File {
    File {
        name: rel.to_string(),
        rel_name: rel.to_string(),
        exists: true,
        new: false,
        file_type: FileType::File,
        hash: String::new(),
        symlink_target: None,
    }
}

fn deleted(rel: &str) -> File {
    File {
        exists: false,
        ..changed(rel)
    }
}

fn sh(script: &str) -> Action {
    Action::new(vec!["sh", "-c", script], "", vec![])
}

async fn start_server(root: &Path, cancel: &CancellationToken) -> Result<String, ArkError> {
    let server = SyncServer::bind("127.0.0.1:0").await?;
    let addr = server.local_addr()?;
    let handler: Arc<dyn ChangeHandler> =
        Arc::new(ChangeApplier::new(Some(root.to_path_buf()), RestartMode::Manual));
    tokio::spawn(server.serve(handler, cancel.clone()));
    Ok(addr.to_string())
}

#[test]
fn traversal_entry_is_rejected_before_writing() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dest = tmp.path().join("a/b/ws");
    std::fs::create_dir_all(&dest)?;

    let bytes = archive_with_raw_name("../../etc/passwd", b"root::0:0::/:/bin/sh\n");
    let err = gzip_untar(&dest, &bytes, None).unwrap_err();

    assert!(matches!(err, ArkError::UnsafeArchive(_)), "got {err:?}");
    assert!(!tmp.path().join("a/etc/passwd").exists());
    assert_eq!(std::fs::read_dir(&dest)?.count(), 0);
    Ok(())
}

#[test]
fn absolute_entry_is_rejected() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let bytes = archive_with_raw_name("/tmp/evil.txt", b"x");
    let err = gzip_untar(tmp.path(), &bytes, None).unwrap_err();
    assert!(matches!(err, ArkError::UnsafeArchive(_)));
    Ok(())
}

#[test]
fn entry_below_a_symlinked_directory_is_rejected() -> TestResult {
    let outside = tempfile::tempdir()?;
    let root = tempfile::tempdir()?;
    std::os::unix::fs::symlink(outside.path(), root.path().join("evil"))?;

    let bytes = archive_with_raw_name("evil/pwned.txt", b"pwned");
    let err = gzip_untar(root.path(), &bytes, None).unwrap_err();

    assert!(matches!(err, ArkError::UnsafeArchive(_)), "got {err:?}");
    assert!(!outside.path().join("pwned.txt").exists());
    Ok(())
}

#[test]
fn symlink_at_entry_path_is_replaced_not_followed() -> TestResult {
    let outside = tempfile::tempdir()?;
    write_file(outside.path(), "target.txt", "keep");
    let root = tempfile::tempdir()?;
    std::os::unix::fs::symlink(outside.path().join("target.txt"), root.path().join("link.txt"))?;

    let bytes = archive_with_raw_name("link.txt", b"new");
    gzip_untar(root.path(), &bytes, None)?;

    assert_eq!(std::fs::read_to_string(outside.path().join("target.txt"))?, "keep");
    let meta = std::fs::symlink_metadata(root.path().join("link.txt"))?;
    assert!(meta.file_type().is_file());
    assert_eq!(std::fs::read_to_string(root.path().join("link.txt"))?, "new");
    Ok(())
}

#[test]
fn unpacked_size_is_capped() -> TestResult {
    let zeros = vec![0u8; 1024 * 1024];
    let bytes = archive_with_raw_name("big.bin", &zeros);
    assert!(bytes.len() < 64 * 1024);

    let dest = tempfile::tempdir()?;
    let err = gzip_untar(dest.path(), &bytes, Some(64 * 1024)).unwrap_err();
    assert!(matches!(err, ArkError::SyncError(_)), "got {err:?}");
    assert_eq!(std::fs::read_dir(dest.path())?.count(), 0);

    let summary = gzip_untar(dest.path(), &bytes, Some(zeros.len() as u64))?;
    assert_eq!(summary.bytes, zeros.len() as u64);
    Ok(())
}

#[test]
fn files_round_trip_with_mode() -> TestResult {
    use std::os::unix::fs::PermissionsExt;

    let src = tempfile::tempdir()?;
    write_file(src.path(), "bin/run.sh", "#!/bin/sh\necho hi\n");
    write_file(src.path(), "conf/app.toml", "x = 1\n");
    std::fs::set_permissions(
        src.path().join("bin/run.sh"),
        std::fs::Permissions::from_mode(0o755),
    )?;

    let bytes = gzip_tar_files(
        &[src.path().join("bin/run.sh"), src.path().join("conf/app.toml"), src.path().join("gone.txt")],
        src.path(),
    )?;
    let dest = tempfile::tempdir()?;
    let summary = gzip_untar(dest.path(), &bytes, None)?;

    assert_eq!(summary.files, 2);
    assert_eq!(std::fs::read_to_string(dest.path().join("conf/app.toml"))?, "x = 1\n");
    let mode = std::fs::metadata(dest.path().join("bin/run.sh"))?.permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    Ok(())
}

#[tokio::test]
async fn unsafe_archive_error_reaches_the_client() -> TestResult {
    init_tracing();
    let ws = tempfile::tempdir()?;
    let root = ws.path().join("inner/ws");
    std::fs::create_dir_all(&root)?;
    let cancel = CancellationToken::new();
    let endpoint = start_server(&root, &cancel).await?;

    let mut notification = ChangeNotification::new("", vec![changed("../../etc/passwd")]);
    notification.archive = Some(archive_with_raw_name("../../etc/passwd", b"pwned"));

    let mut client = SyncClient::new(endpoint);
    let err = with_timeout(client.send(&notification)).await.unwrap_err();

    assert!(matches!(err, ArkError::UnsafeArchive(_)), "got {err:?}");
    assert!(!ws.path().join("etc/passwd").exists());

    // The stream survives a rejected notification.
    let seq = with_timeout(client.send(&ChangeNotification::new("", vec![deleted("nothing.txt")]))).await?;
    assert_eq!(seq, 2);
    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn notifications_apply_in_order_deletes_then_untar_then_actions() -> TestResult {
    init_tracing();
    let remote = tempfile::tempdir()?;
    let local = tempfile::tempdir()?;
    let cancel = CancellationToken::new();
    let endpoint = start_server(remote.path(), &cancel).await?;
    let mut client = SyncClient::new(endpoint);

    // N1: create a.txt, then append it to the log.
    write_file(local.path(), "a.txt", "one");
    let mut n1 = ChangeNotification::new("", vec![changed("a.txt")]);
    n1.archive = Some(gzip_tar_files(&[local.path().join("a.txt")], local.path())?);
    n1.actions = vec![sh("cat a.txt >> log.txt")];

    // N2: a.txt is deleted and b.txt unpacked before the action runs.
    write_file(local.path(), "b.txt", "two");
    let mut n2 = ChangeNotification::new("", vec![deleted("a.txt"), changed("b.txt")]);
    n2.archive = Some(gzip_tar_files(&[local.path().join("b.txt")], local.path())?);
    n2.actions = vec![sh("test ! -e a.txt && cat b.txt >> log.txt")];

    assert_eq!(with_timeout(client.send(&n1)).await?, 1);
    assert_eq!(std::fs::read_to_string(remote.path().join("log.txt"))?, "one");
    assert_eq!(with_timeout(client.send(&n2)).await?, 2);

    assert_eq!(std::fs::read_to_string(remote.path().join("log.txt"))?, "onetwo");
    assert!(!remote.path().join("a.txt").exists());
    client.close().await;
    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn failing_action_is_reported_as_sync_error() -> TestResult {
    init_tracing();
    let remote = tempfile::tempdir()?;
    let cancel = CancellationToken::new();
    let endpoint = start_server(remote.path(), &cancel).await?;
    let mut client = SyncClient::new(endpoint);

    let mut n = ChangeNotification::new("", vec![deleted("x")]);
    n.actions = vec![sh("exit 3")];
    let err = with_timeout(client.send(&n)).await.unwrap_err();

    assert!(matches!(err, ArkError::SyncError(_)), "got {err:?}");
    cancel.cancel();
    Ok(())
}

#[tokio::test]
async fn deletion_outside_root_is_rejected() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let root = tmp.path().join("ws");
    std::fs::create_dir_all(&root)?;
    write_file(tmp.path(), "keep.txt", "precious");

    let applier = ChangeApplier::new(Some(root), RestartMode::Manual);
    let err = applier
        .apply_notification(ChangeNotification::new("", vec![deleted("../keep.txt")]))
        .await
        .unwrap_err();

    assert!(matches!(err, ArkError::UnsafeArchive(_)));
    assert!(tmp.path().join("keep.txt").exists());
    Ok(())
}

#[tokio::test]
async fn deletion_through_a_symlink_is_rejected() -> TestResult {
    init_tracing();
    let outside = tempfile::tempdir()?;
    write_file(outside.path(), "keep.txt", "precious");
    let root = tempfile::tempdir()?;
    std::os::unix::fs::symlink(outside.path(), root.path().join("evil"))?;

    let applier = ChangeApplier::new(Some(root.path().to_path_buf()), RestartMode::Manual);
    let err = applier
        .apply_notification(ChangeNotification::new("", vec![deleted("evil/keep.txt")]))
        .await
        .unwrap_err();

    assert!(matches!(err, ArkError::UnsafeArchive(_)), "got {err:?}");
    assert!(outside.path().join("keep.txt").exists());
    Ok(())
}

#[tokio::test]
async fn dial_failure_is_a_sync_error() -> TestResult {
    init_tracing();
    // Bind then drop to get a port nobody listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);

    let mut client = SyncClient::new(addr.to_string());
    let err = with_timeout(client.send(&ChangeNotification::new("", vec![deleted("x")])))
        .await
        .unwrap_err();
    assert!(matches!(err, ArkError::SyncError(_)), "got {err:?}");
    assert!(!client.is_connected());
    Ok(())
}

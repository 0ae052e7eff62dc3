// src/supervisor/apply.rs

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::actions::Action;
use crate::archive::{check_entry_name, contained_path, gzip_untar, human_size};
use crate::errors::{ArkError, Result};
use crate::observer::ChangeNotification;
use crate::supervisor::process::StopHandle;
use crate::sync::{ChangeHandler, DEFAULT_MAX_ARCHIVE_BYTES};
use crate::target::BoxFuture;
use crate::types::RestartMode;

/// What one notification changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub deleted: usize,
    pub unpacked_files: usize,
    pub actions: usize,
    pub restart_requested: bool,
}

/// Applies change notifications to the workload's filesystem: deletions,
/// then the archive, then actions, then the restart request.
///
/// Notifications are applied one at a time even across connections.
pub struct ChangeApplier {
    root: Option<PathBuf>,
    mode: RestartMode,
    stop: Option<StopHandle>,
    max_unpacked: u64,
    serial: Mutex<()>,
}

impl std::fmt::Debug for ChangeApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeApplier")
            .field("root", &self.root)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl ChangeApplier {
    /// With `root = None` each notification's own root is used, falling back
    /// to the current directory when that is empty.
    pub fn new(root: Option<PathBuf>, mode: RestartMode) -> Self {
        Self {
            root,
            mode,
            stop: None,
            max_unpacked: DEFAULT_MAX_ARCHIVE_BYTES as u64,
            serial: Mutex::new(()),
        }
    }

    /// Cap on the unpacked size of one notification's archive.
    pub fn with_max_unpacked_bytes(mut self, max: u64) -> Self {
        self.max_unpacked = max;
        self
    }

    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = Some(stop);
        self
    }

    fn root_for(&self, notification: &ChangeNotification) -> Result<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        if !notification.root.is_empty() {
            return Ok(PathBuf::from(&notification.root));
        }
        Ok(std::env::current_dir()?)
    }

    pub async fn apply_notification(&self, notification: ChangeNotification) -> Result<ApplySummary> {
        let _guard = self.serial.lock().await;
        let root = self.root_for(&notification)?;
        let mut summary = ApplySummary::default();

        info!(root = %root.display(), files = notification.files.len(), "applying change notification");

        let deletions: Vec<&str> = notification
            .files
            .iter()
            .filter(|f| f.is_deleted())
            .map(|f| f.rel_name.as_str())
            .collect();
        let mut doomed = Vec::with_capacity(deletions.len());
        for rel in &deletions {
            check_entry_name(rel)?;
            doomed.push(contained_path(&root, rel)?);
        }
        for path in doomed {
            remove_path(&path);
            summary.deleted += 1;
        }

        if let Some(bytes) = notification.archive.filter(|b| !b.is_empty()) {
            let size = bytes.len() as u64;
            let dest = root.clone();
            let max = self.max_unpacked;
            let unpacked = tokio::task::spawn_blocking(move || gzip_untar(&dest, &bytes, Some(max)))
                .await
                .map_err(|e| ArkError::SyncError(format!("unpack task failed: {e}")))??;
            info!(
                files = unpacked.files,
                size = %human_size(size),
                "unpacked archive"
            );
            summary.unpacked_files = unpacked.files;
        }

        for action in &notification.actions {
            run_action(action, &root).await?;
            summary.actions += 1;
        }

        if self.mode.restarts_after_unarchive() {
            if let Some(stop) = &self.stop {
                summary.restart_requested = stop.request();
            }
        }

        Ok(summary)
    }
}

impl ChangeHandler for ChangeApplier {
    fn apply<'a>(&'a self, notification: ChangeNotification) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move { self.apply_notification(notification).await.map(|_| ()) })
    }
}

/// Missing paths are fine; anything else is logged and skipped.
fn remove_path(path: &Path) {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => debug!(path = %path.display(), "deleted"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!(path = %path.display(), error = %e, "delete failed; ignoring"),
    }
}

async fn run_action(action: &Action, root: &Path) -> Result<()> {
    let Some((program, args)) = action.command.split_first() else {
        return Err(ArkError::SyncError("action with empty command".to_string()));
    };
    let workdir = if action.workdir.is_empty() {
        root.to_path_buf()
    } else {
        root.join(&action.workdir)
    };

    info!(command = ?action.command, workdir = %workdir.display(), "running action");
    let status = Command::new(program)
        .args(args)
        .current_dir(&workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| ArkError::SyncError(format!("starting action {:?}: {e}", action.command)))?;

    if !status.success() {
        return Err(ArkError::SyncError(format!(
            "action {:?} failed: {status}",
            action.command
        )));
    }
    Ok(())
}

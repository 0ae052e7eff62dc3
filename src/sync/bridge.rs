// src/sync/bridge.rs

//! Host-side adapter from observer notifications to the sync stream.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::ActionMatcher;
use crate::archive::{gzip_tar_files, human_size};
use crate::errors::{ArkError, Result};
use crate::observer::{ChangeNotification, Subscription};
use crate::sync::client::SyncClient;
use crate::sync::protocol::{DEFAULT_MAX_ARCHIVE_BYTES, check_archive_size};

/// Counters reported when the bridge stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub sent: usize,
    pub failed: usize,
    /// Notifications folded into a later send.
    pub merged: usize,
}

pub struct LiveSyncBridge {
    root: PathBuf,
    matcher: ActionMatcher,
    client: SyncClient,
    max_archive: usize,
    stop_on_first_error: bool,
}

impl LiveSyncBridge {
    pub fn new(root: impl Into<PathBuf>, matcher: ActionMatcher, client: SyncClient) -> Self {
        Self {
            root: root.into(),
            matcher,
            client,
            max_archive: DEFAULT_MAX_ARCHIVE_BYTES,
            stop_on_first_error: false,
        }
    }

    pub fn with_max_archive_bytes(mut self, max: usize) -> Self {
        self.max_archive = max;
        self
    }

    pub fn stop_on_first_error(mut self, stop: bool) -> Self {
        self.stop_on_first_error = stop;
        self
    }

    /// Attach the archive of added/modified files and the selected actions.
    ///
    /// `None` when the delta is empty.
    pub async fn prepare(&self, mut notification: ChangeNotification) -> Result<Option<ChangeNotification>> {
        if notification.is_empty() {
            return Ok(None);
        }

        notification.actions = self.matcher.select(notification.rel_names());

        let paths: Vec<PathBuf> = notification
            .present_files()
            .map(|f| self.root.join(&f.rel_name))
            .collect();
        if !paths.is_empty() {
            let root = self.root.clone();
            let bytes = tokio::task::spawn_blocking(move || gzip_tar_files(&paths, &root))
                .await
                .map_err(|e| ArkError::SyncError(format!("archive task failed: {e}")))??;
            check_archive_size(bytes.len(), self.max_archive)?;
            notification.archive = Some(bytes);
        }

        Ok(Some(notification))
    }

    fn root(&self) -> &Path {
        &self.root
    }

    /// Forward notifications until the subscription closes or `cancel`
    /// fires. Errors are logged and skipped unless `stop_on_first_error`.
    pub async fn run(mut self, mut subscription: Subscription, cancel: CancellationToken) -> Result<SyncStats> {
        let mut stats = SyncStats::default();
        info!(root = %self.root().display(), endpoint = %self.client.endpoint(), "live sync started");

        loop {
            let delivery = tokio::select! {
                delivery = subscription.next() => delivery,
                _ = cancel.cancelled() => break,
            };
            let Some(delivery) = delivery else {
                break;
            };

            let mut pending = match delivery {
                Ok(n) => n,
                Err(e) => {
                    self.on_error(&mut stats, e)?;
                    continue;
                }
            };

            // Fold in whatever queued up while the previous send was in flight.
            while let Some(more) = subscription.try_next() {
                match more {
                    Ok(n) => {
                        pending.merge(n);
                        stats.merged += 1;
                    }
                    Err(e) => self.on_error(&mut stats, e)?,
                }
            }

            let prepared = match self.prepare(pending).await {
                Ok(Some(n)) => n,
                Ok(None) => {
                    debug!("empty delta; nothing to sync");
                    continue;
                }
                Err(e) => {
                    self.on_error(&mut stats, e)?;
                    continue;
                }
            };

            let sent = tokio::select! {
                sent = self.client.send(&prepared) => sent,
                _ = cancel.cancelled() => {
                    debug!("cancelled while waiting for an ack");
                    break;
                }
            };
            match sent {
                Ok(seq) => {
                    stats.sent += 1;
                    info!(
                        seq,
                        files = prepared.files.len(),
                        actions = prepared.actions.len(),
                        archive = %human_size(prepared.archive.as_ref().map_or(0, |a| a.len() as u64)),
                        "synced changes"
                    );
                }
                Err(e) => self.on_error(&mut stats, e)?,
            }
        }

        self.client.close().await;
        info!(sent = stats.sent, failed = stats.failed, "live sync stopped");
        Ok(stats)
    }

    fn on_error(&self, stats: &mut SyncStats, err: ArkError) -> Result<()> {
        stats.failed += 1;
        if self.stop_on_first_error {
            return Err(err);
        }
        warn!(error = %err, "sync failed; continuing");
        Ok(())
    }
}

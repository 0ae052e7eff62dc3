// src/observer/watcher.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ArkError, Result};
use crate::hash::relative_slash_path;
use crate::observer::file::ChangeNotification;
use crate::observer::scan::{Snapshot, diff, scan};
use crate::patterns::{FileFilter, PatternSet};

/// Default debounce window between the first filesystem event and the rescan.
pub const DEFAULT_COALESCE: Duration = Duration::from_millis(100);

type Delivery = Result<ChangeNotification>;

struct Subscriber {
    filter: FileFilter,
    tx: mpsc::UnboundedSender<Delivery>,
}

/// Receiving end of one subscription.
///
/// Yields `None` once the observer has shut down.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Non-blocking poll, used to coalesce notifications that queued up
    /// while the consumer was busy.
    pub fn try_next(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

/// Handle for a running observer.
///
/// Dropping it stops the underlying filesystem watch; cancelling the token
/// passed to [`Observer::spawn`] also closes every subscription.
pub struct Observer {
    root: PathBuf,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    _watcher: RecommendedWatcher,
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer").field("root", &self.root).finish()
    }
}

impl Observer {
    /// Start watching `root`.
    ///
    /// The tree is scanned once up front to establish a baseline, so only
    /// changes made after this call produce notifications.
    pub fn spawn(
        root: impl Into<PathBuf>,
        ignores: PatternSet,
        coalesce: Duration,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let root = root.into();
        let root = root.canonicalize().unwrap_or(root);

        let base_filter = FileFilter::everything(ignores.clone())?;
        let baseline = scan(&root, &base_filter, None)?;
        info!(root = %root.display(), entries = baseline.len(), "observer baseline scan complete");

        let (rescan_tx, rescan_rx) = mpsc::unbounded_channel::<()>();

        let mut watcher = RecommendedWatcher::new(
            {
                let root = root.clone();
                let ignores = ignores.clone();
                move |res: notify::Result<Event>| match res {
                    Ok(event) => {
                        if event_is_relevant(&root, &ignores, &event) {
                            let _ = rescan_tx.send(());
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "file watch error");
                    }
                }
            },
            Config::default(),
        )
        .map_err(|e| ArkError::ObserverError(format!("creating watcher: {e}")))?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(|e| ArkError::ObserverError(format!("watching {}: {e}", root.display())))?;

        let subscribers: Arc<Mutex<Vec<Subscriber>>> = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(scan_loop(
            root.clone(),
            base_filter,
            baseline,
            coalesce,
            rescan_rx,
            Arc::clone(&subscribers),
            cancel,
        ));

        Ok(Self {
            root,
            subscribers,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a subscriber; it sees every later delta that `filter` keeps.
    pub fn subscribe(&self, filter: FileFilter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subs) = self.subscribers.lock() {
            subs.push(Subscriber { filter, tx });
        }
        Subscription { rx }
    }
}

fn event_is_relevant(root: &Path, ignores: &PatternSet, event: &Event) -> bool {
    if event.kind.is_access() {
        return false;
    }
    event.paths.iter().any(|path| match relative_slash_path(root, path) {
        Ok(rel) if rel.is_empty() => true,
        Ok(rel) => !ignores.matches_file(&rel),
        // Paths reported outside the canonical root (e.g. via a symlinked
        // root) still warrant a rescan.
        Err(_) => true,
    })
}

async fn scan_loop(
    root: PathBuf,
    base_filter: FileFilter,
    mut snapshot: Snapshot,
    coalesce: Duration,
    mut rescan_rx: mpsc::UnboundedReceiver<()>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            trigger = rescan_rx.recv() => {
                if trigger.is_none() {
                    break;
                }
            }
        }

        // Debounce: keep absorbing events until the window stays quiet.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(coalesce) => break,
                more = rescan_rx.recv() => {
                    if more.is_none() {
                        break;
                    }
                }
            }
        }
        if cancel.is_cancelled() {
            break;
        }

        let scan_root = root.clone();
        let scan_filter = base_filter.clone();
        let previous = snapshot.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            scan(&scan_root, &scan_filter, Some(&previous)).map(|next| {
                let delta = diff(&scan_root, &previous, &next);
                (next, delta)
            })
        })
        .await
        .map_err(|e| ArkError::ObserverError(format!("scan task failed: {e}")))
        .and_then(|res| res);

        match scanned {
            Ok((next, delta)) => {
                snapshot = next;
                if delta.is_empty() {
                    continue;
                }
                debug!(changed = delta.len(), "observer detected changes");
                dispatch(&subscribers, |sub| {
                    let files: Vec<_> = delta
                        .iter()
                        .filter(|f| sub.filter.keeps(&f.rel_name))
                        .cloned()
                        .collect();
                    if files.is_empty() {
                        None
                    } else {
                        Some(Ok(ChangeNotification::new(root.to_string_lossy(), files)))
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "observer scan failed");
                let message = err.to_string();
                dispatch(&subscribers, |_| {
                    Some(Err(ArkError::ObserverError(message.clone())))
                });
            }
        }
    }

    // Dropping the senders closes every subscription.
    if let Ok(mut subs) = subscribers.lock() {
        subs.clear();
    }
    debug!("observer scan loop finished");
}

fn dispatch<F>(subscribers: &Mutex<Vec<Subscriber>>, mut make: F)
where
    F: FnMut(&Subscriber) -> Option<Delivery>,
{
    let Ok(mut subs) = subscribers.lock() else {
        return;
    };
    subs.retain(|sub| match make(sub) {
        Some(delivery) => sub.tx.send(delivery).is_ok(),
        None => !sub.tx.is_closed(),
    });
}

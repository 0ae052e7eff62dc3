// src/engine/walk.rs

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{DagGraph, SchedulerStep, VisitOutcome, WalkScheduler};
use crate::errors::{ArkError, Result};
use crate::target::{Address, Target};

/// Knobs for [`topo_walk`].
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Maximum number of visits in flight.
    pub concurrency: usize,
    /// Halt every chain, not only the failing one, on the first error.
    pub stop_on_first_error: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            stop_on_first_error: false,
        }
    }
}

/// What a successful walk did.
#[derive(Debug)]
pub struct WalkReport<T> {
    /// Visit results in completion order.
    pub completed: Vec<(Address, T)>,
    pub failed: Vec<Address>,
    pub skipped: Vec<Address>,
}

impl<T> Default for WalkReport<T> {
    fn default() -> Self {
        Self {
            completed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

impl<T> WalkReport<T> {
    pub fn visit_order(&self) -> Vec<&Address> {
        self.completed.iter().map(|(a, _)| a).collect()
    }
}

/// Visit every vertex of `graph` at most once, dependencies first.
///
/// Independent vertices are visited concurrently, at most
/// `opts.concurrency` at a time. A failed visit skips its transitive
/// dependents; with `stop_on_first_error` nothing new is dispatched at all.
/// Visits already in flight always run to completion before this returns.
///
/// Returns `Cancelled` if `cancel` fired, otherwise the first visit error.
pub async fn topo_walk<F, Fut, T>(
    graph: &DagGraph,
    visit: F,
    opts: WalkOptions,
    cancel: &CancellationToken,
) -> Result<WalkReport<T>>
where
    F: Fn(Arc<Target>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let visit = Arc::new(visit);
    let limit = opts.concurrency.max(1);

    let mut scheduler = WalkScheduler::new(graph);
    let mut report = WalkReport::default();
    let mut ready: VecDeque<Address> = VecDeque::new();
    let mut in_flight: JoinSet<(Address, Result<T>)> = JoinSet::new();
    let mut first_error: Option<ArkError> = None;
    let mut cancelled = false;

    let step = scheduler.start();
    absorb(step, &mut ready, &mut report);
    info!(vertices = scheduler.len(), concurrency = limit, "graph walk started");

    loop {
        if !cancelled && cancel.is_cancelled() {
            cancelled = true;
            info!("walk cancelled; waiting for in-flight visits");
            absorb(scheduler.halt(), &mut ready, &mut report);
            ready.clear();
        }

        while in_flight.len() < limit && !scheduler.is_halted() {
            let Some(address) = ready.pop_front() else {
                break;
            };
            let target = graph.lookup_by_address(&address)?;
            let visit = Arc::clone(&visit);
            debug!(vertex = %address, "dispatching visit");
            in_flight.spawn(async move {
                let result = visit(target).await;
                (address, result)
            });
        }

        if in_flight.is_empty() {
            break;
        }

        let joined = tokio::select! {
            joined = in_flight.join_next() => joined,
            _ = cancel.cancelled(), if !cancelled => continue,
        };
        let Some(joined) = joined else {
            break;
        };

        let (address, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                in_flight.shutdown().await;
                return Err(ArkError::Other(anyhow::anyhow!("visit task failed: {e}")));
            }
        };

        let step = match result {
            Ok(value) => {
                report.completed.push((address.clone(), value));
                scheduler.step_completion(&address, VisitOutcome::Success)
            }
            Err(err) => {
                warn!(vertex = %address, error = %err, "visit failed");
                report.failed.push(address.clone());
                if first_error.is_none() {
                    first_error = Some(err);
                }
                let step = scheduler.step_completion(&address, VisitOutcome::Failed);
                if opts.stop_on_first_error && !scheduler.is_halted() {
                    absorb(step, &mut ready, &mut report);
                    scheduler.halt()
                } else {
                    step
                }
            }
        };
        absorb(step, &mut ready, &mut report);
        if scheduler.is_halted() {
            ready.clear();
        }
    }

    if cancelled {
        return Err(ArkError::Cancelled);
    }
    if let Some(err) = first_error {
        return Err(err);
    }

    info!(visited = report.completed.len(), "graph walk finished");
    Ok(report)
}

fn absorb<T>(step: SchedulerStep, ready: &mut VecDeque<Address>, report: &mut WalkReport<T>) {
    ready.extend(step.newly_scheduled);
    report.skipped.extend(step.newly_skipped);
}

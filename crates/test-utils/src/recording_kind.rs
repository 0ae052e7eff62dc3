use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ark::errors::{ArkError, Result};
use ark::target::{BoxFuture, BuildRequest, Capabilities, TargetKind};

/// Shared record of what a [`RecordingKind`] built.
#[derive(Debug, Default)]
pub struct BuildLog {
    order: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl BuildLog {
    /// Addresses in the order their builds started.
    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.order.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Test kind named `recording`: cacheable, records every build, writes
/// `out.txt` containing the address into the artifact directory, and fails
/// for the configured addresses.
#[derive(Debug)]
pub struct RecordingKind {
    log: Arc<BuildLog>,
    failing: HashSet<String>,
    delay: Duration,
    cacheable: bool,
}

impl RecordingKind {
    pub fn new(log: Arc<BuildLog>) -> Self {
        Self {
            log,
            failing: HashSet::new(),
            delay: Duration::ZERO,
            cacheable: true,
        }
    }

    pub fn failing(mut self, address: &str) -> Self {
        self.failing.insert(address.to_string());
        self
    }

    /// Time every build takes (cancellable).
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }
}

impl RecordingKind {
    async fn run(&self, address: &str, req: &BuildRequest<'_>) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = req.ctx.cancel.cancelled() => return Err(ArkError::Cancelled),
            }
        }
        if self.failing.contains(address) {
            return Err(ArkError::build(address, "configured to fail"));
        }
        std::fs::write(req.out_dir.join("out.txt"), address)?;
        Ok(())
    }
}

impl TargetKind for RecordingKind {
    fn name(&self) -> &str {
        "recording"
    }

    fn capabilities(&self) -> Capabilities {
        if self.cacheable {
            Capabilities::CACHEABLE
        } else {
            Capabilities::BUILDABLE
        }
    }

    fn build<'a>(&'a self, req: BuildRequest<'a>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let address = req.target.address_str().to_string();
            self.log.order.lock().unwrap().push(address.clone());
            let now = self.log.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.log.max_in_flight.fetch_max(now, Ordering::SeqCst);

            let result = self.run(&address, &req).await;

            self.log.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

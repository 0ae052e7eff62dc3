// src/supervisor/process.rs

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ArkError, Result};
use crate::supervisor::log_sink::{LogShipper, LogStream};
use crate::types::RestartMode;

/// Timing knobs of the watch loop.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// First (and minimum) delay before restarting an exited child.
    pub backoff_floor: Duration,
    pub backoff_cap: Duration,
    /// A child that ran this long resets the backoff to the floor.
    pub healthy_after: Duration,
    /// Time between the graceful signal and the forced kill.
    pub grace: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            backoff_floor: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(30),
            healthy_after: Duration::from_secs(30),
            grace: Duration::from_secs(10),
        }
    }
}

impl SupervisorOptions {
    fn next_backoff(&self, current: Duration) -> Duration {
        (current * 2).min(self.backoff_cap).max(self.backoff_floor)
    }
}

/// Asks the watch loop to stop the current child; the loop then starts a
/// fresh one. Requests made while one is already pending collapse into it.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: mpsc::Sender<()>,
}

impl StopHandle {
    /// Never blocks. `false` once the supervisor is gone.
    pub fn request(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

enum ChildEvent {
    Exited(std::io::Result<std::process::ExitStatus>),
    StopRequested,
    Cancelled,
}

/// Keeps one child process running inside the workload.
pub struct Supervisor {
    argv: Vec<String>,
    mode: RestartMode,
    options: SupervisorOptions,
    stop_tx: mpsc::Sender<()>,
    stop_rx: mpsc::Receiver<()>,
    starts: Arc<AtomicUsize>,
    log_shipper: Option<LogShipper>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("argv", &self.argv)
            .field("mode", &self.mode)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    pub fn new(argv: Vec<String>, mode: RestartMode) -> Result<Self> {
        if argv.is_empty() {
            return Err(ArkError::SupervisorError(
                "no command given to supervise".to_string(),
            ));
        }
        let (stop_tx, stop_rx) = mpsc::channel(1);
        Ok(Self {
            argv,
            mode,
            options: SupervisorOptions::default(),
            stop_tx,
            stop_rx,
            starts: Arc::new(AtomicUsize::new(0)),
            log_shipper: None,
        })
    }

    pub fn with_options(mut self, options: SupervisorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_log_shipper(mut self, shipper: LogShipper) -> Self {
        self.log_shipper = Some(shipper);
        self
    }

    pub fn mode(&self) -> RestartMode {
        self.mode
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Shared counter of child starts.
    pub fn start_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.starts)
    }

    fn spawn_child(&self) -> Result<Child> {
        let mut cmd = Command::new(&self.argv[0]);
        cmd.args(&self.argv[1..])
            .process_group(0)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ArkError::SupervisorError(format!("spawning {:?}: {e}", self.argv))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_lines(stdout, LogStream::Stdout, self.log_shipper.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_lines(stderr, LogStream::Stderr, self.log_shipper.clone()));
        }
        Ok(child)
    }

    /// Run the child until `cancel` fires, restarting it whenever it exits
    /// or a stop is requested.
    pub async fn watch(mut self, cancel: CancellationToken) -> Result<()> {
        let mut backoff = self.options.backoff_floor;
        info!(argv = ?self.argv, mode = %self.mode, "supervisor started");

        loop {
            if cancel.is_cancelled() {
                break;
            }
            // A request that raced with the previous child's exit is stale.
            while self.stop_rx.try_recv().is_ok() {}

            let mut child = match self.spawn_child() {
                Ok(child) => child,
                Err(e) => {
                    warn!(error = %e, retry_in = ?backoff, "child failed to start");
                    if !sleep_or_cancel(backoff, &cancel).await {
                        break;
                    }
                    backoff = self.options.next_backoff(backoff);
                    continue;
                }
            };

            let started = Instant::now();
            let count = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
            info!(pid = ?child.id(), starts = count, "child started");

            let event = tokio::select! {
                status = child.wait() => ChildEvent::Exited(status),
                Some(()) = self.stop_rx.recv() => ChildEvent::StopRequested,
                _ = cancel.cancelled() => ChildEvent::Cancelled,
            };

            if started.elapsed() >= self.options.healthy_after {
                backoff = self.options.backoff_floor;
            }

            let delay = match event {
                ChildEvent::Exited(Ok(status)) => {
                    warn!(%status, retry_in = ?backoff, "child exited");
                    let delay = backoff;
                    backoff = self.options.next_backoff(backoff);
                    delay
                }
                ChildEvent::Exited(Err(e)) => {
                    warn!(error = %e, "waiting for child failed");
                    let delay = backoff;
                    backoff = self.options.next_backoff(backoff);
                    delay
                }
                ChildEvent::StopRequested => {
                    info!("restart requested; stopping child");
                    stop_child(&mut child, self.options.grace).await;
                    self.options.backoff_floor
                }
                ChildEvent::Cancelled => {
                    info!("shutting down; stopping child");
                    stop_child(&mut child, self.options.grace).await;
                    break;
                }
            };

            if !sleep_or_cancel(delay, &cancel).await {
                break;
            }
        }

        info!(starts = self.starts.load(Ordering::SeqCst), "supervisor stopped");
        Ok(())
    }
}

/// Failures are logged; the supervisor keeps going.
async fn stop_child(child: &mut Child, grace: Duration) {
    if let Err(e) = terminate_process_group(child, grace).await {
        warn!(error = %e, "stopping child failed; killing it directly");
        if let Err(e) = child.start_kill() {
            debug!(error = %e, "direct kill failed");
        }
    }
}

/// `false` if cancelled first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = cancel.cancelled() => false,
    }
}

async fn pump_lines<R>(reader: R, stream: LogStream, shipper: Option<LogShipper>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();

    while let Ok(Some(line)) = lines.next_line().await {
        let mut bytes = line.clone().into_bytes();
        bytes.push(b'\n');
        let written = match stream {
            LogStream::Stdout => stdout.write_all(&bytes).await,
            LogStream::Stderr => stderr.write_all(&bytes).await,
        };
        if let Err(e) = written {
            debug!(error = %e, "forwarding child output");
        }
        if let Some(shipper) = &shipper {
            shipper.ship(stream, line);
        }
    }
}

/// Staged termination of the child's whole process group.
///
/// Sends `SIGTERM` to the group, waits up to `grace`, then sends `SIGKILL`.
/// Returns `true` when the forced kill was needed.
pub async fn terminate_process_group(child: &mut Child, grace: Duration) -> Result<bool> {
    let Some(pid) = child.id() else {
        return Ok(false);
    };
    let pgid = i32::try_from(pid)
        .map(Pid::from_raw)
        .map_err(|_| ArkError::SupervisorError(format!("pid {pid} out of range")))?;

    send_group(pgid, Signal::SIGTERM);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => {
            let status = status?;
            info!(%status, "child stopped gracefully");
            Ok(false)
        }
        Err(_) => {
            warn!(grace = ?grace, "child ignored SIGTERM; killing process group");
            send_group(pgid, Signal::SIGKILL);
            let status = child.wait().await?;
            info!(%status, "child killed");
            Ok(true)
        }
    }
}

fn send_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) => debug!(pgid = pgid.as_raw(), ?signal, "signalled process group"),
        Err(Errno::ESRCH) => debug!(pgid = pgid.as_raw(), "process group already gone"),
        Err(e) => warn!(pgid = pgid.as_raw(), ?signal, error = %e, "signalling process group failed"),
    }
}

// src/supervisor/log_sink.rs

//! Optional copy of the child's output to a remote log sink.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EntrypointEnv;

const QUEUE_DEPTH: usize = 1024;
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Serialize)]
struct Hello<'a> {
    token: &'a str,
    org_id: &'a str,
    project_id: &'a str,
}

#[derive(Debug, Serialize)]
struct LogRecord<'a> {
    org_id: &'a str,
    project_id: &'a str,
    stream: LogStream,
    line: &'a str,
    /// Milliseconds since the Unix epoch.
    created_at: u64,
}

struct Shipped {
    stream: LogStream,
    line: String,
    created_at: u64,
}

/// Handle used by the output pumps. Lines are queued and written by a
/// background task; when the queue is full or the sink is down they are
/// dropped.
#[derive(Debug, Clone)]
pub struct LogShipper {
    tx: mpsc::Sender<Shipped>,
}

impl std::fmt::Debug for Shipped {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shipped").field("stream", &self.stream).finish_non_exhaustive()
    }
}

impl LogShipper {
    /// Shipper configured from the entrypoint environment, if both the token
    /// and the sink address are set.
    pub fn from_env(env: &EntrypointEnv, cancel: CancellationToken) -> Option<Self> {
        let token = env.user_token.clone()?;
        let endpoint = env.log_sink_endpoint()?;
        Some(Self::spawn(
            endpoint,
            token,
            env.org_id.clone(),
            env.project_id.clone(),
            cancel,
        ))
    }

    pub fn spawn(
        endpoint: String,
        token: String,
        org_id: String,
        project_id: String,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let endpoint = endpoint
            .trim_start_matches("tcp://")
            .trim_end_matches('/')
            .to_string();
        let sink = Sink {
            endpoint,
            token,
            org_id,
            project_id,
        };
        tokio::spawn(sink.run(rx, cancel));
        Self { tx }
    }

    pub fn ship(&self, stream: LogStream, line: String) {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or_default();
        if self
            .tx
            .try_send(Shipped {
                stream,
                line,
                created_at,
            })
            .is_err()
        {
            debug!("log sink queue full; dropping line");
        }
    }
}

struct Sink {
    endpoint: String,
    token: String,
    org_id: String,
    project_id: String,
}

impl Sink {
    async fn connect(&self) -> std::io::Result<TcpStream> {
        let mut stream = TcpStream::connect(&self.endpoint).await?;
        let hello = Hello {
            token: &self.token,
            org_id: &self.org_id,
            project_id: &self.project_id,
        };
        let mut bytes = serde_json::to_vec(&hello)?;
        bytes.push(b'\n');
        stream.write_all(&bytes).await?;
        info!(endpoint = %self.endpoint, "connected to log sink");
        Ok(stream)
    }

    async fn run(self, mut rx: mpsc::Receiver<Shipped>, cancel: CancellationToken) {
        let mut conn: Option<TcpStream> = None;
        let mut retry_at = tokio::time::Instant::now();

        loop {
            let shipped = tokio::select! {
                shipped = rx.recv() => shipped,
                _ = cancel.cancelled() => break,
            };
            let Some(shipped) = shipped else {
                break;
            };

            if conn.is_none() && tokio::time::Instant::now() >= retry_at {
                match self.connect().await {
                    Ok(stream) => conn = Some(stream),
                    Err(e) => {
                        warn!(endpoint = %self.endpoint, error = %e, "log sink unreachable");
                        retry_at = tokio::time::Instant::now() + RECONNECT_DELAY;
                    }
                }
            }
            let Some(stream) = conn.as_mut() else {
                continue;
            };

            let record = LogRecord {
                org_id: &self.org_id,
                project_id: &self.project_id,
                stream: shipped.stream,
                line: &shipped.line,
                created_at: shipped.created_at,
            };
            let mut bytes = match serde_json::to_vec(&record) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(error = %e, "encoding log record");
                    continue;
                }
            };
            bytes.push(b'\n');
            if let Err(e) = stream.write_all(&bytes).await {
                warn!(error = %e, "log sink write failed; reconnecting later");
                conn = None;
                retry_at = tokio::time::Instant::now() + RECONNECT_DELAY;
            }
        }

        if let Some(mut stream) = conn {
            let _ = stream.shutdown().await;
        }
    }
}

// src/sync/client.rs

use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info, warn};

use crate::errors::{ArkError, Result};
use crate::observer::ChangeNotification;
use crate::sync::protocol::{
    DEFAULT_DIAL_TIMEOUT, DEFAULT_MAX_ARCHIVE_BYTES, FileChangeAck, FileChangeNotification,
    max_frame_len, read_frame, write_frame,
};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Host side of a sync stream.
///
/// Each [`send`](SyncClient::send) waits for the matching ack before
/// returning. A transport failure drops the connection; the next send dials
/// again. Nothing is replayed.
pub struct SyncClient {
    endpoint: String,
    dial_timeout: Duration,
    max_archive: usize,
    conn: Option<Connection>,
    seq: u64,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.conn.is_some())
            .field("seq", &self.seq)
            .finish()
    }
}

impl SyncClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            max_archive: DEFAULT_MAX_ARCHIVE_BYTES,
            conn: None,
            seq: 0,
        }
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    pub fn with_max_archive_bytes(mut self, max: usize) -> Self {
        self.max_archive = max;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    pub async fn connect(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let stream = tokio::time::timeout(self.dial_timeout, TcpStream::connect(&self.endpoint))
            .await
            .map_err(|_| {
                ArkError::SyncError(format!(
                    "dialing {} timed out after {:?}",
                    self.endpoint, self.dial_timeout
                ))
            })?
            .map_err(|e| ArkError::SyncError(format!("dialing {}: {e}", self.endpoint)))?;
        stream.set_nodelay(true)?;

        let (read, write) = stream.into_split();
        self.conn = Some(Connection {
            reader: BufReader::new(read),
            writer: write,
        });
        info!(endpoint = %self.endpoint, "sync stream connected");
        Ok(())
    }

    /// Send one notification and wait for its ack. Returns the frame's
    /// sequence number.
    ///
    /// A rejected notification (`status = error`) comes back as the remote
    /// error kind; the stream stays open.
    pub async fn send(&mut self, notification: &ChangeNotification) -> Result<u64> {
        self.connect().await?;
        self.seq += 1;
        let seq = self.seq;
        let frame = FileChangeNotification::encode(seq, notification, self.max_archive)?;
        let max_len = max_frame_len(self.max_archive);

        let Some(conn) = self.conn.as_mut() else {
            return Err(ArkError::SyncError("not connected".to_string()));
        };

        let exchange = async {
            write_frame(&mut conn.writer, &frame).await?;
            read_frame::<_, FileChangeAck>(&mut conn.reader, max_len).await
        };

        let ack = match exchange.await {
            Ok(Some(ack)) => ack,
            Ok(None) => {
                self.conn = None;
                return Err(ArkError::SyncError(format!(
                    "{} closed the stream before acking #{seq}",
                    self.endpoint
                )));
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "sync transport failed; will redial");
                self.conn = None;
                return Err(e);
            }
        };

        if ack.seq() != seq {
            self.conn = None;
            return Err(ArkError::SyncError(format!(
                "expected ack for #{seq}, got #{}",
                ack.seq()
            )));
        }

        debug!(seq, files = notification.files.len(), "notification acknowledged");
        ack.into_result().map(|()| seq)
    }

    /// Half-close the stream so the server sees a clean EOF.
    pub async fn close(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            use tokio::io::AsyncWriteExt;
            if let Err(e) = conn.writer.shutdown().await {
                debug!(error = %e, "closing sync stream");
            }
        }
    }
}

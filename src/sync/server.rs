// src/sync/server.rs

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{ArkError, Result};
use crate::observer::ChangeNotification;
use crate::sync::protocol::{
    DEFAULT_MAX_ARCHIVE_BYTES, FileChangeAck, FileChangeNotification, max_frame_len, read_frame,
    write_frame,
};
use crate::target::BoxFuture;

/// Applies one decoded notification. Its result decides the reply frame.
pub trait ChangeHandler: Send + Sync {
    fn apply<'a>(&'a self, notification: ChangeNotification) -> BoxFuture<'a, Result<()>>;
}

/// Supervisor side of the sync stream.
///
/// Frames on one connection are handled strictly one after another: a
/// notification is fully applied and answered before the next is read.
#[derive(Debug)]
pub struct SyncServer {
    listener: TcpListener,
    max_archive: usize,
}

impl SyncServer {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ArkError::SyncError(format!("binding sync listener: {e}")))?;
        Ok(Self::from_listener(listener))
    }

    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            listener,
            max_archive: DEFAULT_MAX_ARCHIVE_BYTES,
        }
    }

    pub fn with_max_archive_bytes(mut self, max: usize) -> Self {
        self.max_archive = max;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `cancel` fires.
    pub async fn serve(self, handler: Arc<dyn ChangeHandler>, cancel: CancellationToken) -> Result<()> {
        info!(addr = ?self.listener.local_addr().ok(), "sync server listening");

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = cancel.cancelled() => break,
            };

            let (stream, peer) = match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            info!(%peer, "sync client connected");
            let handler = Arc::clone(&handler);
            let cancel = cancel.child_token();
            let max_archive = self.max_archive;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, handler, max_archive, cancel).await {
                    warn!(%peer, error = %e, "sync stream ended with error");
                } else {
                    info!(%peer, "sync stream closed");
                }
            });
        }

        info!("sync server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    handler: Arc<dyn ChangeHandler>,
    max_archive: usize,
    cancel: CancellationToken,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (read, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read);
    let max_len = max_frame_len(max_archive);

    loop {
        let frame = tokio::select! {
            frame = read_frame::<_, FileChangeNotification>(&mut reader, max_len) => frame,
            _ = cancel.cancelled() => return Ok(()),
        };

        let frame = match frame {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(e) => {
                // The stream is no longer in sync; answer once and hang up.
                let reply = FileChangeAck::from_result(0, &Err(e));
                write_frame(&mut writer, &reply).await?;
                return reply.into_result();
            }
        };

        let seq = frame.seq;
        debug!(seq, files = frame.files.len(), actions = frame.actions.len(), "received notification");

        let result = match frame.decode(max_archive) {
            Ok(notification) => handler.apply(notification).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            warn!(seq, error = %e, "notification rejected");
        }

        write_frame(&mut writer, &FileChangeAck::from_result(seq, &result)).await?;
    }
}

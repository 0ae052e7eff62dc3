// src/sync/protocol.rs

//! Wire format of the sync stream: newline-delimited JSON frames over a
//! byte stream.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::actions::Action;
use crate::archive::human_size;
use crate::errors::{ArkError, Result};
use crate::observer::{ChangeNotification, File};

pub const DEFAULT_MAX_ARCHIVE_BYTES: usize = 64 * 1024 * 1024;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Room for the file list and JSON framing on top of the encoded archive.
const FRAME_OVERHEAD: usize = 8 * 1024 * 1024;

/// Client frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChangeNotification {
    pub seq: u64,
    pub root: String,
    pub files: Vec<File>,
    /// base64 of the gzip(tar) payload; empty when nothing was added or
    /// modified.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub archive: String,
    #[serde(default)]
    pub actions: Vec<Action>,
}

impl FileChangeNotification {
    pub fn encode(seq: u64, notification: &ChangeNotification, max_archive: usize) -> Result<Self> {
        let archive = match notification.archive.as_deref() {
            Some(bytes) if !bytes.is_empty() => {
                check_archive_size(bytes.len(), max_archive)?;
                BASE64.encode(bytes)
            }
            _ => String::new(),
        };
        Ok(Self {
            seq,
            root: notification.root.clone(),
            files: notification.files.clone(),
            archive,
            actions: notification.actions.clone(),
        })
    }

    pub fn decode(self, max_archive: usize) -> Result<ChangeNotification> {
        let archive = if self.archive.is_empty() {
            None
        } else {
            // Reject before allocating the decoded payload.
            check_archive_size(self.archive.len() / 4 * 3, max_archive)?;
            let bytes = BASE64
                .decode(self.archive.as_bytes())
                .map_err(|e| ArkError::SyncError(format!("archive is not valid base64: {e}")))?;
            check_archive_size(bytes.len(), max_archive)?;
            Some(bytes)
        };
        Ok(ChangeNotification {
            root: self.root,
            files: self.files,
            archive,
            actions: self.actions,
        })
    }
}

pub fn check_archive_size(len: usize, max_archive: usize) -> Result<()> {
    if len > max_archive {
        return Err(ArkError::SyncError(format!(
            "archive of {} exceeds the {} limit",
            human_size(len as u64),
            human_size(max_archive as u64)
        )));
    }
    Ok(())
}

/// Server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FileChangeAck {
    Ack { seq: u64 },
    Error { seq: u64, kind: String, message: String },
}

impl FileChangeAck {
    pub fn from_result(seq: u64, result: &Result<()>) -> Self {
        match result {
            Ok(()) => FileChangeAck::Ack { seq },
            Err(e) => FileChangeAck::Error {
                seq,
                kind: e.kind().to_string(),
                message: e.to_string(),
            },
        }
    }

    pub fn seq(&self) -> u64 {
        match self {
            FileChangeAck::Ack { seq } | FileChangeAck::Error { seq, .. } => *seq,
        }
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            FileChangeAck::Ack { .. } => Ok(()),
            FileChangeAck::Error { kind, message, .. } => Err(ArkError::from_wire(&kind, message)),
        }
    }
}

/// Longest frame accepted for a given archive cap.
pub fn max_frame_len(max_archive: usize) -> usize {
    max_archive / 3 * 4 + FRAME_OVERHEAD
}

/// Read one frame. `Ok(None)` on a clean EOF between frames.
pub async fn read_frame<R, T>(reader: &mut R, max_len: usize) -> Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    let limit = u64::try_from(max_len).unwrap_or(u64::MAX);
    let read = reader
        .take(limit)
        .read_until(b'\n', &mut line)
        .await
        .map_err(|e| ArkError::SyncError(format!("reading frame: {e}")))?;

    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        if read >= max_len {
            return Err(ArkError::SyncError(format!(
                "frame exceeds {}",
                human_size(max_len as u64)
            )));
        }
        return Err(ArkError::SyncError("stream closed mid-frame".to_string()));
    }

    serde_json::from_slice(&line)
        .map(Some)
        .map_err(|e| ArkError::SyncError(format!("malformed frame: {e}")))
}

pub async fn write_frame<W, T>(writer: &mut W, frame: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut bytes = serde_json::to_vec(frame)?;
    bytes.push(b'\n');
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| ArkError::SyncError(format!("writing frame: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| ArkError::SyncError(format!("writing frame: {e}")))?;
    Ok(())
}

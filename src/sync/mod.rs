// src/sync/mod.rs

//! Live-sync stream between the host and an entrypoint supervisor.
//!
//! - [`protocol`]: JSON-lines frames and the archive size cap.
//! - [`client`]: host side; one notification in flight, waits for its ack.
//! - [`server`]: supervisor side; hands decoded notifications to a
//!   [`ChangeHandler`] in order.
//! - [`bridge`]: observer subscription → archive + actions → client.

pub mod bridge;
pub mod client;
pub mod protocol;
pub mod server;

pub use bridge::{LiveSyncBridge, SyncStats};
pub use client::SyncClient;
pub use protocol::{DEFAULT_MAX_ARCHIVE_BYTES, FileChangeAck, FileChangeNotification};
pub use server::{ChangeHandler, SyncServer};

// src/observer/mod.rs

//! Filesystem observer.
//!
//! - [`scan`] walks the tree into a [`Snapshot`] and diffs snapshots.
//! - [`watcher`] drives rescans from filesystem events and fans deltas out to
//!   subscribers, each with its own [`FileFilter`](crate::patterns::FileFilter).
//! - [`file`] holds the records that travel to subscribers.

pub mod file;
pub mod scan;
pub mod watcher;

pub use file::{ChangeNotification, File, FileType};
pub use scan::{Snapshot, diff, scan};
pub use watcher::{DEFAULT_COALESCE, Observer, Subscription};

// src/observer/scan.rs

//! Full-tree scans and snapshot diffs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use tracing::trace;
use walkdir::WalkDir;

use crate::errors::{ArkError, Result};
use crate::hash::{file_hash, relative_slash_path};
use crate::observer::file::{File, FileType};
use crate::patterns::FileFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub file_type: FileType,
    pub hash: String,
    pub symlink_target: Option<String>,
    modified: Option<SystemTime>,
    len: u64,
}

impl SnapshotEntry {
    fn same_content(&self, other: &SnapshotEntry) -> bool {
        self.file_type == other.file_type
            && self.hash == other.hash
            && self.symlink_target == other.symlink_target
    }
}

/// Files modified this close to a scan are always re-hashed, since a later
/// write within the same mtime tick would otherwise go unnoticed.
const RACY_WINDOW: Duration = Duration::from_secs(2);

/// State of the tree at one point in time, keyed by relative path.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: BTreeMap<String, SnapshotEntry>,
    taken_at: Option<SystemTime>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, rel: &str) -> Option<&SnapshotEntry> {
        self.entries.get(rel)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Walk `root`, pruning ignored directories and keeping entries accepted by
/// `filter`.
///
/// Regular files whose size and mtime match `previous` reuse the previous
/// hash instead of being read again.
pub fn scan(root: &Path, filter: &FileFilter, previous: Option<&Snapshot>) -> Result<Snapshot> {
    let mut entries = BTreeMap::new();
    let taken_at = SystemTime::now();
    let stable_before = previous
        .and_then(|p| p.taken_at)
        .and_then(|t| t.checked_sub(RACY_WINDOW));

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            match relative_slash_path(root, entry.path()) {
                Ok(rel) => filter.should_descend(&rel),
                Err(_) => false,
            }
        });

    for entry in walker {
        let entry = entry.map_err(|e| ArkError::ObserverError(format!("scanning {}: {e}", root.display())))?;
        if entry.depth() == 0 {
            continue;
        }
        let rel = relative_slash_path(root, entry.path())?;
        if !filter.keeps(&rel) {
            continue;
        }

        let meta = entry
            .path()
            .symlink_metadata()
            .map_err(|e| ArkError::ObserverError(format!("stat {rel}: {e}")))?;
        let modified = meta.modified().ok();
        let len = meta.len();

        let record = if meta.file_type().is_symlink() {
            let target = fs::read_link(entry.path())
                .map_err(|e| ArkError::ObserverError(format!("readlink {rel}: {e}")))?;
            SnapshotEntry {
                file_type: FileType::Symlink,
                hash: String::new(),
                symlink_target: Some(target.to_string_lossy().into_owned()),
                modified,
                len,
            }
        } else if meta.is_dir() {
            SnapshotEntry {
                file_type: FileType::Dir,
                hash: String::new(),
                symlink_target: None,
                modified: None,
                len: 0,
            }
        } else {
            let reused = previous
                .and_then(|p| p.entries.get(&rel))
                .filter(|prev| {
                    prev.file_type == FileType::File
                        && prev.len == len
                        && prev.modified == modified
                        && matches!((modified, stable_before), (Some(m), Some(s)) if m < s)
                })
                .map(|prev| prev.hash.clone());
            let hash = match reused {
                Some(hash) => hash,
                None => file_hash(entry.path()).map_err(|e| ArkError::ObserverError(e.to_string()))?,
            };
            SnapshotEntry {
                file_type: FileType::File,
                hash,
                symlink_target: None,
                modified,
                len,
            }
        };

        trace!(path = %rel, "scanned entry");
        entries.insert(rel, record);
    }

    Ok(Snapshot {
        entries,
        taken_at: Some(taken_at),
    })
}

/// Delta between two snapshots, ordered by relative path.
pub fn diff(root: &Path, previous: &Snapshot, next: &Snapshot) -> Vec<File> {
    let mut files = Vec::new();

    for (rel, entry) in &next.entries {
        let new = match previous.entries.get(rel) {
            None => true,
            Some(prev) if !prev.same_content(entry) => false,
            Some(_) => continue,
        };
        files.push(file_record(root, rel, entry, true, new));
    }

    for (rel, entry) in &previous.entries {
        if !next.entries.contains_key(rel) {
            files.push(file_record(root, rel, entry, false, false));
        }
    }

    files.sort_by(|a, b| a.rel_name.cmp(&b.rel_name));
    files
}

fn file_record(root: &Path, rel: &str, entry: &SnapshotEntry, exists: bool, new: bool) -> File {
    File {
        name: root.join(rel).to_string_lossy().into_owned(),
        rel_name: rel.to_string(),
        exists,
        new,
        file_type: entry.file_type,
        hash: entry.hash.clone(),
        symlink_target: entry.symlink_target.clone(),
    }
}

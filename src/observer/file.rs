// src/observer/file.rs

//! Records produced by the observer.

use serde::{Deserialize, Serialize};

use crate::actions::Action;

/// Kind of filesystem entry, serialized as `f`, `d` or `l`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileType {
    #[serde(rename = "f")]
    File,
    #[serde(rename = "d")]
    Dir,
    #[serde(rename = "l")]
    Symlink,
}

/// One entry of a change delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Absolute path on the producing host.
    pub name: String,
    /// Path relative to the workspace root, forward slashes.
    pub rel_name: String,
    pub exists: bool,
    /// Not present in the previous scan.
    pub new: bool,
    #[serde(rename = "type")]
    pub file_type: FileType,
    /// SHA-1 of the content; empty for directories and links.
    #[serde(default)]
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symlink_target: Option<String>,
}

impl File {
    pub fn is_deleted(&self) -> bool {
        !self.exists
    }

    pub fn is_regular(&self) -> bool {
        self.file_type == FileType::File
    }
}

/// A batch of file deltas below `root`, optionally carrying the archive and
/// actions to ship to a supervisor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeNotification {
    pub root: String,
    pub files: Vec<File>,
    pub archive: Option<Vec<u8>>,
    pub actions: Vec<Action>,
}

impl ChangeNotification {
    pub fn new(root: impl Into<String>, files: Vec<File>) -> Self {
        Self {
            root: root.into(),
            files,
            archive: None,
            actions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn rel_names(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.rel_name.as_str())
    }

    /// Regular files that exist after this change.
    pub fn present_files(&self) -> impl Iterator<Item = &File> {
        self.files.iter().filter(|f| f.exists && f.is_regular())
    }

    /// Merge a later notification into this one; the later delta for a path
    /// wins, except that a path first seen as new stays new.
    pub fn merge(&mut self, later: ChangeNotification) {
        for file in later.files {
            match self.files.iter_mut().find(|f| f.rel_name == file.rel_name) {
                Some(existing) => {
                    let was_new = existing.new;
                    *existing = file;
                    existing.new = existing.new || was_new;
                }
                None => self.files.push(file),
            }
        }
        self.files.sort_by(|a, b| a.rel_name.cmp(&b.rel_name));
    }
}

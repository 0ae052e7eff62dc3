// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawWorkspaceFile, WorkspaceFile};
use crate::errors::{ArkError, Result};

/// Name of the workspace file at the workspace root.
pub const WORKSPACE_FILE: &str = "ark.toml";

/// Read and deserialize a workspace file without semantic validation.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawWorkspaceFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .map_err(|e| ArkError::ConfigError(format!("reading {}: {e}", path.display())))?;
    parse_str(&contents)
}

pub fn parse_str(contents: &str) -> Result<RawWorkspaceFile> {
    Ok(toml::from_str(contents)?)
}

/// Read, deserialize and validate.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<WorkspaceFile> {
    let raw = load_from_path(&path)?;
    WorkspaceFile::try_from(raw)
}

/// Walk up from `start` to the nearest directory holding [`WORKSPACE_FILE`].
pub fn find_workspace_root(start: &Path) -> Result<PathBuf> {
    let start = if start.is_absolute() {
        start.to_path_buf()
    } else {
        std::env::current_dir()?.join(start)
    };

    start
        .ancestors()
        .find(|dir| dir.join(WORKSPACE_FILE).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            ArkError::ConfigError(format!(
                "no {WORKSPACE_FILE} found in {} or any parent directory",
                start.display()
            ))
        })
}

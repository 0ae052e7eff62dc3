// src/cache/local.rs

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use crate::errors::{ArkError, Result};
use crate::hash::short_hash;
use crate::target::Address;

/// Marker written next to a committed artifact.
pub const STATE_FILE: &str = "state.json";

const STAGING_DIR: &str = ".staging";

/// Contents of [`STATE_FILE`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCacheState {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub hash: String,
}

/// On-disk store at `<root>/<address>/<hash>/`.
///
/// Artifacts are built in a staging directory on the same filesystem and
/// committed with a single rename, so readers never observe a partial entry.
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self, address: &Address, hash: &str) -> PathBuf {
        self.root.join(address.as_str()).join(hash)
    }

    pub fn load_state(&self, address: &Address, hash: &str) -> Result<Option<BuildCacheState>> {
        let path = self.artifact_dir(address, hash).join(STATE_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ArkError::CacheError(format!(
                    "reading {}: {e}",
                    path.display()
                )));
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable cache marker");
                Ok(None)
            }
        }
    }

    /// True iff an artifact for exactly this hash is committed.
    pub fn check(&self, address: &Address, hash: &str) -> Result<bool> {
        let hit = self
            .load_state(address, hash)?
            .is_some_and(|state| state.hash == hash);
        debug!(address = %address, hash = %short_hash(hash), hit, "local cache check");
        Ok(hit)
    }

    /// Fresh empty directory for a build or pull.
    pub fn staging_dir(&self) -> Result<TempDir> {
        let staging_root = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging_root).map_err(|e| {
            ArkError::CacheError(format!("creating {}: {e}", staging_root.display()))
        })?;
        tempfile::Builder::new()
            .prefix("build-")
            .tempdir_in(&staging_root)
            .map_err(|e| ArkError::CacheError(format!("creating staging dir: {e}")))
    }

    /// Write the marker into `staging` and move it into place.
    pub fn commit(&self, address: &Address, kind: &str, hash: &str, staging: TempDir) -> Result<PathBuf> {
        let state = BuildCacheState {
            name: address.to_string(),
            kind: kind.to_string(),
            hash: hash.to_string(),
        };
        write_atomic(staging.path(), STATE_FILE, &serde_json::to_vec_pretty(&state)?)?;

        let final_dir = self.artifact_dir(address, hash);
        if let Some(parent) = final_dir.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| ArkError::CacheError(format!("creating {}: {e}", parent.display())))?;
        }

        if final_dir.exists() {
            // Forced rebuild: move the old entry aside before replacing it.
            let graveyard = self.staging_dir()?;
            let old = graveyard.path().join("old");
            if let Err(e) = fs::rename(&final_dir, &old) {
                debug!(error = %e, "previous artifact already moved");
            }
        }

        match fs::rename(staging.path(), &final_dir) {
            Ok(()) => {}
            Err(e) if final_dir.exists() && self.check(address, hash)? => {
                debug!(address = %address, error = %e, "concurrent commit won; keeping existing artifact");
            }
            Err(e) => {
                return Err(ArkError::CacheError(format!(
                    "committing {}: {e}",
                    final_dir.display()
                )));
            }
        }

        info!(address = %address, hash = %short_hash(hash), "artifact committed to local cache");
        Ok(final_dir)
    }

    /// Remove every cached artifact.
    pub fn clean(&self) -> Result<()> {
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ArkError::CacheError(format!(
                "removing {}: {e}",
                self.root.display()
            ))),
        }
    }
}

/// temp file in `dir` + rename onto `dir/name`.
pub(crate) fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| ArkError::CacheError(format!("creating temp file in {}: {e}", dir.display())))?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(dir.join(name))
        .map_err(|e| ArkError::CacheError(format!("persisting {name}: {e}")))?;
    Ok(())
}

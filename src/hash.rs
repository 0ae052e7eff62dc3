// src/hash.rs

//! Content hashing.
//!
//! Two scopes:
//! - per-file identity: SHA-1 over the file bytes (the convention used by
//!   file-watch tooling), see [`file_hash`].
//! - aggregates: SHA-256 over sorted `"<hex>  <path>\n"` lines, see
//!   [`hash_dir`] and [`TargetHasher`].

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use crate::errors::{ArkError, Result};

/// Number of hex characters kept by [`short_hash`].
pub const SHORT_HASH_LEN: usize = 12;

/// Streaming SHA-1 of a single file, hex encoded.
pub fn file_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        ArkError::HashError(format!("opening {} for hashing: {e}", path.display()))
    })?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Fixed-length display prefix of a full hash.
pub fn short_hash(hash: &str) -> &str {
    let end = hash.len().min(SHORT_HASH_LEN);
    &hash[..end]
}

/// Aggregate hash of every regular file below `dir`.
///
/// The walk is lexical, so the result does not depend on the order in which
/// the filesystem returns directory entries.
pub fn hash_dir(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| ArkError::HashError(format!("walking {}: {e}", dir.display())))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = relative_slash_path(dir, entry.path())?;
        reject_newline(&rel)?;
        let hash = file_hash(entry.path())?;
        hasher.update(format!("{hash}  {rel}\n").as_bytes());
    }

    let hash = hex::encode(hasher.finalize());
    debug!(dir = %dir.display(), hash = %short_hash(&hash), "computed directory hash");
    Ok(hash)
}

/// Workspace-relative path with forward slashes.
pub fn relative_slash_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).map_err(|_| {
        ArkError::HashError(format!(
            "{} is not below {}",
            path.display(),
            root.display()
        ))
    })?;
    Ok(rel.to_string_lossy().replace('\\', "/"))
}

fn reject_newline(name: &str) -> Result<()> {
    if name.contains('\n') {
        return Err(ArkError::HashError(format!(
            "file name contains a newline: {name:?}"
        )));
    }
    Ok(())
}

/// Accumulates the inputs of a target hash.
///
/// Inputs may be added in any order; [`TargetHasher::finish`] sorts them.
#[derive(Debug, Default)]
pub struct TargetHasher {
    kind: String,
    attributes: String,
    sources: Vec<(String, String)>,
    dependencies: Vec<String>,
}

impl TargetHasher {
    pub fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    /// Record the computed attributes. Object keys are serialized sorted.
    pub fn attributes(mut self, value: &serde_json::Value) -> Self {
        let mut out = String::new();
        write_canonical_json(value, &mut out);
        self.attributes = out;
        self
    }

    pub fn source_file(mut self, rel: impl Into<String>, hash: impl Into<String>) -> Self {
        self.sources.push((rel.into(), hash.into()));
        self
    }

    pub fn dependency(mut self, hash: impl Into<String>) -> Self {
        self.dependencies.push(hash.into());
        self
    }

    pub fn finish(mut self) -> Result<String> {
        self.sources.sort();
        self.dependencies.sort();

        let mut hasher = Sha256::new();
        hasher.update(format!("kind:{}\n", self.kind).as_bytes());
        hasher.update(format!("attributes:{}\n", self.attributes).as_bytes());
        for (rel, hash) in &self.sources {
            reject_newline(rel)?;
            hasher.update(format!("{hash}  {rel}\n").as_bytes());
        }
        for dep in &self.dependencies {
            hasher.update(format!("dep:{dep}\n").as_bytes());
        }
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Serialize JSON with object keys in lexical order regardless of how the
/// map was built.
fn write_canonical_json(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical_json(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// src/archive.rs

//! gzip(tar) encoding of file sets and directory trees, and guarded
//! extraction.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{Archive, Builder, EntryType};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::errors::{ArkError, Result};
use crate::hash::relative_slash_path;

/// Archive the given regular files with names relative to `prefix`.
///
/// Files that disappeared since they were listed are skipped.
pub fn gzip_tar_files<P: AsRef<Path>>(files: &[P], prefix: &Path) -> Result<Vec<u8>> {
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.follow_symlinks(false);

    for file in files {
        let path = file.as_ref();
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "file vanished before archiving; skipping");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            continue;
        }
        let name = relative_slash_path(prefix, path)?;
        builder.append_path_with_name(path, &name)?;
    }

    finish(builder)
}

/// Archive a whole directory tree (regular files and directories).
pub fn gzip_tar_dir(dir: &Path) -> Result<Vec<u8>> {
    let mut builder = Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    builder.follow_symlinks(false);

    for entry in WalkDir::new(dir).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(|e| ArkError::CacheError(format!("walking {}: {e}", dir.display())))?;
        if entry.depth() == 0 {
            continue;
        }
        let name = relative_slash_path(dir, entry.path())?;
        let ft = entry.file_type();
        if ft.is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else if ft.is_file() {
            builder.append_path_with_name(entry.path(), &name)?;
        }
    }

    finish(builder)
}

fn finish(builder: Builder<GzEncoder<Vec<u8>>>) -> Result<Vec<u8>> {
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// Counts of what [`gzip_untar`] wrote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub files: usize,
    pub dirs: usize,
    pub bytes: u64,
}

/// Unpack `bytes` below `dest`.
///
/// Every entry is checked before anything is written: names that are
/// absolute, contain `..` or lead through a symlink already present below
/// `dest` fail the whole archive with `UnsafeArchive`. With `max_unpacked`,
/// entries adding up to more than that many bytes fail it with `SyncError`.
/// Only regular files and directories are extracted.
pub fn gzip_untar(dest: &Path, bytes: &[u8], max_unpacked: Option<u64>) -> Result<UnpackSummary> {
    let mut declared: u64 = 0;
    let mut archive = Archive::new(GzDecoder::new(bytes));
    for entry in archive.entries().map_err(malformed)? {
        let entry = entry.map_err(malformed)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        check_entry_name(&name)?;
        contained_path(dest, &name)?;

        declared = declared.saturating_add(entry.size());
        if let Some(max) = max_unpacked {
            if declared > max {
                return Err(ArkError::SyncError(format!(
                    "archive unpacks to more than {}",
                    human_size(max)
                )));
            }
        }
    }

    fs::create_dir_all(dest)?;
    let mut summary = UnpackSummary::default();
    let mut archive = Archive::new(GzDecoder::new(bytes));

    for entry in archive.entries().map_err(malformed)? {
        let mut entry = entry.map_err(malformed)?;
        let name = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let target = contained_path(dest, &name)?;
        let mode = entry.header().mode().unwrap_or(0o644) & 0o7777;

        match entry.header().entry_type() {
            EntryType::Directory => {
                unlink_symlink(&target)?;
                fs::create_dir_all(&target)?;
                fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
                summary.dirs += 1;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                unlink_symlink(&target)?;
                let mut out = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(mode)
                    .open(&target)?;
                let written = io::copy(&mut entry, &mut out)?;
                out.flush()?;
                // `mode` on open only applies to new files.
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
                summary.files += 1;
                summary.bytes += written;
            }
            other => {
                warn!(entry = %name, kind = ?other, "skipping unsupported archive entry");
            }
        }
    }

    Ok(summary)
}

fn malformed(e: io::Error) -> ArkError {
    ArkError::SyncError(format!("malformed archive: {e}"))
}

/// A symlink in the way of an entry is replaced, never followed.
fn unlink_symlink(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => {
            debug!(path = %path.display(), "replacing symlink");
            fs::remove_file(path)?;
            Ok(())
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// `root/rel`, provided no existing parent of it below `root` is a symlink.
///
/// The last component may itself be a symlink; callers replace or remove the
/// link rather than its target.
pub fn contained_path(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel_path = Path::new(rel);
    let mut path = root.to_path_buf();
    let mut components = rel_path.components().peekable();

    while let Some(component) = components.next() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => continue,
            _ => {
                return Err(ArkError::UnsafeArchive(format!(
                    "entry {rel:?} escapes the destination"
                )));
            }
        }
        if components.peek().is_none() {
            break;
        }
        match fs::symlink_metadata(&path) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return Err(ArkError::UnsafeArchive(format!(
                    "entry {rel:?} leads through symlink {}",
                    path.display()
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }

    Ok(path)
}

/// Reject names that are absolute or contain `..`.
pub fn check_entry_name(name: &str) -> Result<()> {
    if name.contains("..") {
        return Err(ArkError::UnsafeArchive(format!(
            "entry {name:?} escapes the destination"
        )));
    }
    let path = Path::new(name);
    if path
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)))
    {
        return Err(ArkError::UnsafeArchive(format!(
            "entry {name:?} is absolute"
        )));
    }
    Ok(())
}

/// `1536` → `"1.5 KiB"`.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

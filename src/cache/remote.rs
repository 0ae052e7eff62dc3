// src/cache/remote.rs

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::errors::{ArkError, Result};
use crate::target::Address;
use crate::target::context::BoxFuture;

/// Remote object identity: target address plus full hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    address: String,
    hash: String,
}

impl CacheKey {
    pub fn new(address: &Address, hash: &str) -> Self {
        Self {
            address: address.to_string(),
            hash: hash.to_string(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Relative object path, `<address>/<hash>.tar.gz`.
    pub fn object_name(&self) -> String {
        format!("{}/{}.tar.gz", self.address, self.hash)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.hash)
    }
}

/// Injected artifact store. Payloads are gzip(tar) archives of the artifact
/// directory.
pub trait RemoteCache: Send + Sync + fmt::Debug {
    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool>>;

    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;

    fn put<'a>(&'a self, key: &'a CacheKey, bytes: Vec<u8>) -> BoxFuture<'a, Result<()>>;
}

/// Remote cache backed by a directory (a mounted bucket, NFS share, ...).
#[derive(Debug, Clone)]
pub struct FsRemoteCache {
    dir: PathBuf,
}

impl FsRemoteCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.object_name())
    }
}

fn unavailable(key: &CacheKey, e: std::io::Error) -> ArkError {
    ArkError::CacheError(format!("remote cache {key}: {e}"))
}

impl RemoteCache for FsRemoteCache {
    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            tokio::fs::try_exists(self.object_path(key))
                .await
                .map_err(|e| unavailable(key, e))
        })
    }

    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            match tokio::fs::read(self.object_path(key)).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(unavailable(key, e)),
            }
        })
    }

    fn put<'a>(&'a self, key: &'a CacheKey, bytes: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.object_path(key);
            let Some(parent) = path.parent() else {
                return Err(ArkError::CacheError(format!("bad object path for {key}")));
            };
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| unavailable(key, e))?;

            let parent = parent.to_path_buf();
            let name = format!("{}.tar.gz", key.hash());
            tokio::task::spawn_blocking(move || {
                crate::cache::local::write_atomic(&parent, &name, &bytes)
            })
            .await
            .map_err(|e| ArkError::CacheError(format!("upload task failed: {e}")))??;

            debug!(key = %key, "stored object in remote cache");
            Ok(())
        })
    }
}

/// In-process remote cache.
#[derive(Debug, Default)]
pub struct MemoryRemoteCache {
    objects: Mutex<HashMap<CacheKey, Vec<u8>>>,
    puts: AtomicUsize,
}

impl MemoryRemoteCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of `put` calls that stored an object.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<CacheKey, Vec<u8>>>> {
        self.objects
            .lock()
            .map_err(|_| ArkError::CacheError("memory cache lock poisoned".to_string()))
    }
}

impl RemoteCache for MemoryRemoteCache {
    fn exists<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move { Ok(self.lock()?.contains_key(key)) })
    }

    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move { Ok(self.lock()?.get(key).cloned()) })
    }

    fn put<'a>(&'a self, key: &'a CacheKey, bytes: Vec<u8>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.lock()?.insert(key.clone(), bytes);
            self.puts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

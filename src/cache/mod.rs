// src/cache/mod.rs

//! Artifact caches.
//!
//! - [`local`]: the on-disk content-addressed store under `<ark_dir>/artifacts`.
//! - [`remote`]: the injected artifact store, keyed by address and hash.

pub mod local;
pub mod remote;

pub use local::{BuildCacheState, LocalCache};
pub use remote::{CacheKey, FsRemoteCache, MemoryRemoteCache, RemoteCache};

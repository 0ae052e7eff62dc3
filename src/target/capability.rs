// src/target/capability.rs

//! Capability contracts a target may fulfil.
//!
//! Every target is [`Addressable`]. [`Buildable`] and [`Cacheable`] are
//! optional; callers ask for them through
//! [`Target::as_buildable`](crate::target::Target::as_buildable) and
//! [`Target::as_cacheable`](crate::target::Target::as_cacheable).

use crate::errors::Result;
use crate::target::address::Address;
use crate::target::context::{BoxFuture, BuildContext};

pub trait Addressable: Send + Sync {
    fn address(&self) -> &Address;

    /// One-line human description.
    fn describe(&self) -> String;
}

pub trait Buildable: Addressable {
    /// Evaluate attribute expressions and compute the hash. Idempotent.
    fn pre_build(&self, ctx: &BuildContext) -> Result<()>;

    /// Produce the artifact and populate the local cache for this hash.
    ///
    /// On failure nothing is committed to the cache.
    fn build<'a>(&'a self, ctx: &'a BuildContext) -> BoxFuture<'a, Result<()>>;

    /// Full hash; available once `pre_build` succeeded.
    fn hash(&self) -> Result<&str>;

    fn short_hash(&self) -> Result<&str>;
}

pub trait Cacheable: Buildable {
    fn check_local_build_cache(&self, ctx: &BuildContext) -> Result<bool>;

    fn check_remote_cache<'a>(&'a self, ctx: &'a BuildContext) -> BoxFuture<'a, Result<bool>>;

    /// Leaves the local cache exactly as a successful `build` would.
    fn pull_remote_cache<'a>(&'a self, ctx: &'a BuildContext) -> BoxFuture<'a, Result<()>>;

    /// Idempotent upload of the local artifact.
    fn push_remote_cache<'a>(&'a self, ctx: &'a BuildContext) -> BoxFuture<'a, Result<()>>;
}

/// Which optional capabilities a kind provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub buildable: bool,
    pub cacheable: bool,
}

impl Capabilities {
    pub const ADDRESSABLE: Capabilities = Capabilities {
        buildable: false,
        cacheable: false,
    };
    pub const BUILDABLE: Capabilities = Capabilities {
        buildable: true,
        cacheable: false,
    };
    pub const CACHEABLE: Capabilities = Capabilities {
        buildable: true,
        cacheable: true,
    };
}

// src/target/context.rs

//! Explicit carriers for the state targets need while they are evaluated
//! and built.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::cache::{LocalCache, RemoteCache};
use crate::errors::{ArkError, Result};
use crate::patterns::PatternSet;
use crate::target::registry::TargetRegistry;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub name: String,
    pub description: String,
    /// Absolute package directory; source files resolve against it.
    pub dir: PathBuf,
}

/// Static facts about the loaded workspace.
#[derive(Debug, Clone)]
pub struct WorkspaceInfo {
    pub root: PathBuf,
    pub ark_dir: PathBuf,
    pub packages: BTreeMap<String, PackageInfo>,
    /// Repository-wide ignore rules.
    pub ignores: PatternSet,
}

impl WorkspaceInfo {
    pub fn package(&self, name: &str) -> Result<&PackageInfo> {
        self.packages
            .get(name)
            .ok_or_else(|| ArkError::ConfigError(format!("unknown package {name:?}")))
    }
}

/// Everything a PreBuild, Build or cache operation may touch.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub workspace: Arc<WorkspaceInfo>,
    pub registry: Arc<TargetRegistry>,
    pub local_cache: LocalCache,
    pub remote_cache: Option<Arc<dyn RemoteCache>>,
    pub cancel: CancellationToken,
}

impl BuildContext {
    pub fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(ArkError::Cancelled)
        } else {
            Ok(())
        }
    }
}

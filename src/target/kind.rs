// src/target/kind.rs

//! Pluggable target kinds.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::errors::{ArkError, Result};
use crate::target::capability::Capabilities;
use crate::target::context::{BoxFuture, BuildContext};
use crate::target::kinds;
use crate::target::model::Target;

/// Arguments handed to [`TargetKind::build`].
pub struct BuildRequest<'a> {
    pub target: &'a Target,
    /// Computed attributes (after PreBuild).
    pub attributes: &'a toml::Table,
    /// Empty directory the artifact must be written into. It is committed
    /// to the local cache only if the build succeeds.
    pub out_dir: &'a Path,
    pub ctx: &'a BuildContext,
}

/// Behaviour specific to one kind of target (`local_exec`, `group`, ...).
pub trait TargetKind: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Decode the computed attributes into the kind's typed record.
    fn validate(&self, _attributes: &toml::Table) -> Result<()> {
        Ok(())
    }

    /// Whether a target of this kind uses the cache, given its attributes.
    fn cache_enabled(&self, _attributes: &toml::Table) -> bool {
        self.capabilities().cacheable
    }

    fn build<'a>(&'a self, req: BuildRequest<'a>) -> BoxFuture<'a, Result<()>> {
        let address = req.target.address_str().to_string();
        let kind = self.name().to_string();
        Box::pin(async move {
            Err(ArkError::build(address, format!("kind {kind} is not buildable")))
        })
    }
}

/// Decode computed attributes into a typed record; mismatches are config
/// errors naming the target.
pub fn decode_attributes<T: DeserializeOwned>(address: &str, attributes: &toml::Table) -> Result<T> {
    toml::Value::Table(attributes.clone())
        .try_into::<T>()
        .map_err(|e| ArkError::ConfigError(format!("{address}: {e}")))
}

/// Kinds known to a workspace, keyed by name.
#[derive(Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, Arc<dyn TargetKind>>,
}

impl fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.kinds.keys().collect();
        names.sort();
        f.debug_struct("KindRegistry").field("kinds", &names).finish()
    }
}

impl KindRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with `group`, `local_exec`, `local_file` and `live_sync`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(kinds::group::GroupKind));
        registry.register(Arc::new(kinds::local_exec::LocalExecKind));
        registry.register(Arc::new(kinds::local_file::LocalFileKind));
        registry.register(Arc::new(kinds::live_sync::LiveSyncKind));
        registry
    }

    /// Add or replace a kind.
    pub fn register(&mut self, kind: Arc<dyn TargetKind>) -> &mut Self {
        self.kinds.insert(kind.name().to_string(), kind);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TargetKind>> {
        self.kinds
            .get(name)
            .cloned()
            .ok_or_else(|| ArkError::GraphError(format!("unknown target kind {name:?}")))
    }
}

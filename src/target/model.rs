// src/target/model.rs

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive;
use crate::cache::CacheKey;
use crate::errors::{ArkError, Result};
use crate::hash::{TargetHasher, file_hash, relative_slash_path, short_hash};
use crate::patterns::{PatternSet, SourceRule};
use crate::target::address::Address;
use crate::target::capability::{Addressable, Buildable, Cacheable};
use crate::target::context::{BoxFuture, BuildContext, PackageInfo};
use crate::target::eval::{EvalContext, Interpolator};
use crate::target::kind::{BuildRequest, TargetKind};

/// Declared shape of a target, as read from the workspace file.
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub address: Address,
    pub description: String,
    pub depends_on: Vec<Address>,
    /// Files or directories, relative to the package directory.
    pub source_files: Vec<String>,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
    /// Raw attribute expressions.
    pub attributes: toml::Table,
}

impl TargetSpec {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            description: String::new(),
            depends_on: Vec::new(),
            source_files: Vec::new(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            attributes: toml::Table::new(),
        }
    }
}

/// A target in the registry.
///
/// Constructed at load; `pre_build` fills the computed attributes and the
/// hash exactly once, after which the target is immutable.
pub struct Target {
    spec: TargetSpec,
    /// `depends_on` plus addresses referenced from attribute expressions.
    dependencies: Vec<Address>,
    source_rule: SourceRule,
    /// Source roots relative to the workspace root.
    source_roots: Vec<String>,
    kind: Arc<dyn TargetKind>,
    interpolator: Interpolator,
    computed: OnceLock<toml::Table>,
    hash: OnceLock<String>,
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("address", &self.spec.address)
            .field("dependencies", &self.dependencies)
            .field("hash", &self.hash.get())
            .finish_non_exhaustive()
    }
}

impl Target {
    pub fn new(
        spec: TargetSpec,
        kind: Arc<dyn TargetKind>,
        package: &PackageInfo,
        workspace_root: &Path,
        interpolator: Interpolator,
    ) -> Result<Self> {
        let mut dependencies = spec.depends_on.clone();
        for address in interpolator.referenced_addresses(&spec.attributes)? {
            if !dependencies.contains(&address) {
                dependencies.push(address);
            }
        }
        dependencies.sort();
        dependencies.dedup();

        let package_rel = relative_slash_path(workspace_root, &package.dir).map_err(|_| {
            ArkError::ConfigError(format!(
                "package {} directory {} is outside the workspace",
                package.name,
                package.dir.display()
            ))
        })?;
        let join = |p: &str| -> String {
            let p = p.trim_start_matches("./").trim_end_matches('/');
            match (package_rel.is_empty(), p.is_empty() || p == ".") {
                (true, _) => p.to_string(),
                (false, true) => package_rel.clone(),
                (false, false) => format!("{package_rel}/{p}"),
            }
        };

        let mut source_roots: Vec<String> = spec.source_files.iter().map(|s| join(s)).collect();
        if source_roots.is_empty() && !spec.include_patterns.is_empty() {
            source_roots.push(package_rel.clone());
        }
        let source_rule = SourceRule::new(
            &source_roots,
            &spec.include_patterns,
            &spec.exclude_patterns,
        )
        .map_err(|e| ArkError::ConfigError(format!("{}: {e}", spec.address)))?;

        Ok(Self {
            spec,
            dependencies,
            source_rule,
            source_roots,
            kind,
            interpolator,
            computed: OnceLock::new(),
            hash: OnceLock::new(),
        })
    }

    pub fn address_str(&self) -> &str {
        self.spec.address.as_str()
    }

    pub fn spec(&self) -> &TargetSpec {
        &self.spec
    }

    pub fn kind(&self) -> &Arc<dyn TargetKind> {
        &self.kind
    }

    pub fn kind_name(&self) -> &str {
        self.kind.name()
    }

    /// Direct dependencies, sorted.
    pub fn dependencies(&self) -> &[Address] {
        &self.dependencies
    }

    pub fn source_rule(&self) -> &SourceRule {
        &self.source_rule
    }

    pub fn has_sources(&self) -> bool {
        !self.source_roots.is_empty()
    }

    /// Attributes after PreBuild.
    pub fn computed_attributes(&self) -> Result<&toml::Table> {
        self.computed.get().ok_or_else(|| self.not_evaluated())
    }

    pub fn computed_hash(&self) -> Option<&str> {
        self.hash.get().map(String::as_str)
    }

    pub fn cache_key(&self) -> Result<CacheKey> {
        Ok(CacheKey::new(&self.spec.address, self.target_hash()?))
    }

    fn target_hash(&self) -> Result<&str> {
        self.computed_hash().ok_or_else(|| self.not_evaluated())
    }

    fn not_evaluated(&self) -> ArkError {
        ArkError::ConfigError(format!("{} has not been pre-built", self.spec.address))
    }

    pub fn as_buildable(&self) -> Option<&dyn Buildable> {
        self.kind.capabilities().buildable.then_some(self as &dyn Buildable)
    }

    /// Cacheable only if the kind supports it and the target did not opt
    /// out through its attributes.
    pub fn as_cacheable(&self) -> Option<&dyn Cacheable> {
        let attrs = self.computed.get().unwrap_or(&self.spec.attributes);
        (self.kind.capabilities().cacheable && self.kind.cache_enabled(attrs))
            .then_some(self as &dyn Cacheable)
    }

    /// Evaluate attributes and compute the hash, pre-building dependencies
    /// first. Later calls are no-ops.
    pub fn evaluate(&self, ctx: &BuildContext) -> Result<()> {
        if self.hash.get().is_some() {
            return Ok(());
        }
        ctx.ensure_not_cancelled()?;

        for dep in &self.dependencies {
            ctx.registry.lookup(dep)?.evaluate(ctx)?;
        }

        let package = ctx.workspace.package(self.spec.address.package())?;
        let scope = EvalContext {
            target: self,
            package,
            workspace: &ctx.workspace,
            siblings: &ctx.registry,
            local_cache: &ctx.local_cache,
        };
        let computed = self.interpolator.evaluate(&self.spec.attributes, &scope)?;
        self.kind.validate(&computed)?;

        let hash = self.compute_hash(&computed, ctx)?;
        debug!(
            address = %self.spec.address,
            hash = %short_hash(&hash),
            "evaluated target"
        );

        let _ = self.computed.set(computed);
        let _ = self.hash.set(hash);
        Ok(())
    }

    fn compute_hash(&self, computed: &toml::Table, ctx: &BuildContext) -> Result<String> {
        let attrs = serde_json::to_value(computed)?;
        let mut hasher = TargetHasher::new(self.kind.name()).attributes(&attrs);

        for (rel, path) in self.source_files(&ctx.workspace.root, &ctx.workspace.ignores)? {
            hasher = hasher.source_file(rel, file_hash(&path)?);
        }

        for dep in &self.dependencies {
            let dep_target = ctx.registry.lookup(dep)?;
            let dep_hash = dep_target.computed_hash().ok_or_else(|| dep_target.not_evaluated())?;
            hasher = hasher.dependency(dep_hash);
        }

        hasher.finish()
    }

    /// Every declared source file on disk as `(relative, absolute)`.
    pub fn source_files(&self, root: &Path, ignores: &PatternSet) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();

        for source_root in &self.source_roots {
            let start = root.join(source_root);
            if !start.exists() {
                return Err(ArkError::ConfigError(format!(
                    "{}: source path {source_root:?} does not exist",
                    self.spec.address
                )));
            }

            let walker = WalkDir::new(&start)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    e.depth() == 0
                        || !e.file_type().is_dir()
                        || relative_slash_path(root, e.path())
                            .map(|rel| !ignores.matches_dir(&rel))
                            .unwrap_or(false)
                });

            for entry in walker {
                let entry = entry.map_err(|e| {
                    ArkError::HashError(format!("{}: walking sources: {e}", self.spec.address))
                })?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = relative_slash_path(root, entry.path())?;
                if self.source_rule.check(&rel) && !ignores.matches_file(&rel) {
                    files.push((rel, entry.into_path()));
                }
            }
        }

        files.sort();
        files.dedup();
        Ok(files)
    }
}

impl Addressable for Target {
    fn address(&self) -> &Address {
        &self.spec.address
    }

    fn describe(&self) -> String {
        if self.spec.description.is_empty() {
            format!("{} ({})", self.spec.address, self.kind.name())
        } else {
            format!(
                "{} ({}): {}",
                self.spec.address,
                self.kind.name(),
                self.spec.description
            )
        }
    }
}

impl Buildable for Target {
    fn pre_build(&self, ctx: &BuildContext) -> Result<()> {
        self.evaluate(ctx)
    }

    fn build<'a>(&'a self, ctx: &'a BuildContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let attributes = self.computed_attributes()?;
            let hash = self.target_hash()?;
            ctx.ensure_not_cancelled()?;

            let staging = ctx.local_cache.staging_dir()?;
            info!(
                address = %self.spec.address,
                hash = %short_hash(hash),
                "building target"
            );

            let request = BuildRequest {
                target: self,
                attributes,
                out_dir: staging.path(),
                ctx,
            };
            match self.kind.build(request).await {
                Ok(()) => {
                    if self.as_cacheable().is_some() {
                        ctx.local_cache
                            .commit(&self.spec.address, self.kind.name(), hash, staging)?;
                    }
                    Ok(())
                }
                Err(err @ (ArkError::BuildError { .. } | ArkError::Cancelled)) => Err(err),
                Err(err) => Err(ArkError::build(self.address_str(), err.to_string())),
            }
        })
    }

    fn hash(&self) -> Result<&str> {
        self.target_hash()
    }

    fn short_hash(&self) -> Result<&str> {
        self.target_hash().map(short_hash)
    }
}

impl Cacheable for Target {
    fn check_local_build_cache(&self, ctx: &BuildContext) -> Result<bool> {
        ctx.local_cache.check(&self.spec.address, self.target_hash()?)
    }

    fn check_remote_cache<'a>(&'a self, ctx: &'a BuildContext) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let Some(remote) = ctx.remote_cache.as_ref() else {
                return Ok(false);
            };
            remote.exists(&self.cache_key()?).await
        })
    }

    fn pull_remote_cache<'a>(&'a self, ctx: &'a BuildContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let remote = ctx
                .remote_cache
                .as_ref()
                .ok_or_else(|| ArkError::CacheError("no remote cache configured".to_string()))?;
            let key = self.cache_key()?;
            let bytes = remote
                .get(&key)
                .await?
                .ok_or_else(|| ArkError::CacheError(format!("remote cache has no entry for {key}")))?;

            let staging = ctx.local_cache.staging_dir()?;
            archive::gzip_untar(staging.path(), &bytes, None)
                .map_err(|e| ArkError::CacheError(format!("unpacking {key}: {e}")))?;
            ctx.local_cache
                .commit(&self.spec.address, self.kind.name(), key.hash(), staging)?;
            info!(address = %self.spec.address, size = %archive::human_size(bytes.len() as u64), "pulled from remote cache");
            Ok(())
        })
    }

    fn push_remote_cache<'a>(&'a self, ctx: &'a BuildContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let remote = ctx
                .remote_cache
                .as_ref()
                .ok_or_else(|| ArkError::CacheError("no remote cache configured".to_string()))?;
            let key = self.cache_key()?;
            if remote.exists(&key).await? {
                debug!(address = %self.spec.address, "remote cache already has artifact");
                return Ok(());
            }
            let dir = ctx.local_cache.artifact_dir(&self.spec.address, key.hash());
            let bytes = archive::gzip_tar_dir(&dir)?;
            let size = bytes.len() as u64;
            remote.put(&key, bytes).await?;
            info!(address = %self.spec.address, size = %archive::human_size(size), "pushed to remote cache");
            Ok(())
        })
    }
}

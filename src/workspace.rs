// src/workspace.rs

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{FsRemoteCache, LocalCache, RemoteCache};
use crate::config::{WORKSPACE_FILE, WorkspaceFile, load_and_validate};
use crate::dag::DagGraph;
use crate::engine::{BuildWalker, VisitResult, WalkOptions, WalkReport, topo_walk};
use crate::errors::{ArkError, Result};
use crate::observer::{Observer, Subscription};
use crate::patterns::{FileFilter, PatternSet};
use crate::target::{
    Address, BuildContext, Interpolator, KindRegistry, PackageInfo, Target, TargetRegistry,
    WorkspaceInfo,
};

/// Local artifact store below the state directory.
pub const ARTIFACTS_DIR: &str = "artifacts";

/// A loaded workspace: validated file, target registry and graph.
///
/// The registry is immutable after load; evaluated attributes and hashes are
/// memoized per target, so a fresh `Workspace` is needed to observe source
/// changes made after a build.
pub struct Workspace {
    root: PathBuf,
    file: WorkspaceFile,
    info: Arc<WorkspaceInfo>,
    graph: DagGraph,
    local_cache: LocalCache,
    remote_cache: Option<Arc<dyn RemoteCache>>,
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("root", &self.root)
            .field("targets", &self.graph.len())
            .finish_non_exhaustive()
    }
}

impl Workspace {
    /// Load `<root>/ark.toml` with the built-in kinds.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_kinds(root, &KindRegistry::with_builtins())
    }

    pub fn load_with_kinds(root: impl AsRef<Path>, kinds: &KindRegistry) -> Result<Self> {
        let root = root.as_ref();
        let root = root
            .canonicalize()
            .map_err(|e| ArkError::ConfigError(format!("workspace root {}: {e}", root.display())))?;
        let file = load_and_validate(root.join(WORKSPACE_FILE))?;
        Self::from_file(root, file, kinds)
    }

    pub fn from_file(root: PathBuf, file: WorkspaceFile, kinds: &KindRegistry) -> Result<Self> {
        let ark_dir = root.join(&file.workspace.ark_dir);
        let ignores = repository_ignores(&root, &file)?;

        let packages = file
            .packages
            .values()
            .map(|decl| {
                let info = PackageInfo {
                    name: decl.name.clone(),
                    description: decl.description.clone(),
                    dir: if decl.dir.is_empty() {
                        root.clone()
                    } else {
                        root.join(&decl.dir)
                    },
                };
                (decl.name.clone(), info)
            })
            .collect();
        let info = Arc::new(WorkspaceInfo {
            root: root.clone(),
            ark_dir: ark_dir.clone(),
            packages,
            ignores,
        });

        let interpolator = Interpolator::new()?;
        let mut registry = TargetRegistry::new();
        for decl in file.packages.values() {
            let package = info.package(&decl.name)?;
            for spec in &decl.targets {
                let kind = kinds.get(spec.address.kind())?;
                let target = Target::new(spec.clone(), kind, package, &root, interpolator.clone())?;
                registry.insert(target)?;
            }
        }

        let graph = DagGraph::from_registry(Arc::new(registry))?;

        let remote_cache = file.artifacts.as_ref().map(|a| {
            Arc::new(FsRemoteCache::new(root.join(&a.storage_dir))) as Arc<dyn RemoteCache>
        });

        info!(
            root = %root.display(),
            packages = file.packages.len(),
            targets = graph.len(),
            "workspace loaded"
        );

        Ok(Self {
            local_cache: LocalCache::new(ark_dir.join(ARTIFACTS_DIR)),
            root,
            file,
            info,
            graph,
            remote_cache,
        })
    }

    /// Replace the remote cache backend.
    pub fn with_remote_cache(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote_cache = Some(remote);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn file(&self) -> &WorkspaceFile {
        &self.file
    }

    pub fn info(&self) -> &Arc<WorkspaceInfo> {
        &self.info
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        self.graph.registry()
    }

    pub fn graph(&self) -> &DagGraph {
        &self.graph
    }

    pub fn local_cache(&self) -> &LocalCache {
        &self.local_cache
    }

    pub fn remote_cache(&self) -> Option<&Arc<dyn RemoteCache>> {
        self.remote_cache.as_ref()
    }

    pub fn push_errors_fatal(&self) -> bool {
        self.file.artifacts.as_ref().is_some_and(|a| a.push_errors_fatal)
    }

    pub fn max_archive_bytes(&self) -> usize {
        self.file.workspace.max_archive_bytes
    }

    pub fn coalesce(&self) -> Duration {
        Duration::from_millis(self.file.workspace.coalesce_ms)
    }

    pub fn walk_options(&self, stop_on_first_error: bool) -> WalkOptions {
        let mut opts = WalkOptions::default();
        if let Some(n) = self.file.workspace.concurrency {
            opts.concurrency = n;
        }
        opts.stop_on_first_error = stop_on_first_error;
        opts
    }

    pub fn build_context(&self, cancel: CancellationToken) -> BuildContext {
        BuildContext {
            workspace: Arc::clone(&self.info),
            registry: Arc::clone(self.graph.registry()),
            local_cache: self.local_cache.clone(),
            remote_cache: self.remote_cache.clone(),
            cancel,
        }
    }

    /// The whole graph, or the sub-graph `address` depends on.
    pub fn subgraph(&self, address: Option<&Address>) -> Result<DagGraph> {
        match address {
            Some(address) => self.graph.isolate(address),
            None => Ok(self.graph.clone()),
        }
    }

    /// Walk the (isolated) graph with an arbitrary visit.
    pub async fn graph_walk<F, Fut, T>(
        &self,
        address: Option<&Address>,
        visit: F,
        opts: WalkOptions,
        cancel: &CancellationToken,
    ) -> Result<WalkReport<T>>
    where
        F: Fn(Arc<Target>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let graph = self.subgraph(address)?;
        topo_walk(&graph, visit, opts, cancel).await
    }

    /// Build `address` and everything it depends on.
    pub async fn build(
        &self,
        address: Option<&Address>,
        walker: BuildWalker,
        opts: WalkOptions,
        cancel: &CancellationToken,
    ) -> Result<WalkReport<VisitResult>> {
        let ctx = Arc::new(self.build_context(cancel.clone()));
        self.graph_walk(address, walker.visitor(ctx), opts, cancel).await
    }

    /// Union of the source rules of `address` and its transitive
    /// dependencies, minus the repository ignores.
    pub fn source_filter_for(&self, address: &Address) -> Result<FileFilter> {
        let sub = self.graph.isolate(address)?;
        let mut rules = Vec::new();
        for dep in sub.sorted_addresses() {
            let target = sub.lookup_by_address(&dep)?;
            if target.has_sources() {
                rules.push(target.source_rule().clone());
            }
        }
        debug!(address = %address, rules = rules.len(), "built source filter");
        Ok(FileFilter::new(rules, self.info.ignores.clone()))
    }

    /// Subscription to the changes that can affect `address`.
    pub fn filter_change_notifications_by_target(
        &self,
        observer: &Observer,
        address: &Address,
    ) -> Result<Subscription> {
        Ok(observer.subscribe(self.source_filter_for(address)?))
    }

    pub fn spawn_observer(&self, cancel: CancellationToken) -> Result<Observer> {
        Observer::spawn(&self.root, self.info.ignores.clone(), self.coalesce(), cancel)
    }

    /// Remove the local artifact store.
    pub fn clean(&self) -> Result<()> {
        self.local_cache.clean()?;
        info!(dir = %self.local_cache.root().display(), "local cache removed");
        Ok(())
    }
}

/// `[workspace].ignore`, the root `.gitignore`, the state directory and
/// `.git/`.
fn repository_ignores(root: &Path, file: &WorkspaceFile) -> Result<PatternSet> {
    let mut patterns: Vec<String> = file.workspace.ignore.clone();

    match std::fs::read_to_string(root.join(".gitignore")) {
        Ok(contents) => {
            for line in contents.lines().map(str::trim) {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if line.starts_with('!') {
                    warn!(pattern = %line, "negated .gitignore patterns are not supported; skipping");
                    continue;
                }
                patterns.push(line.to_string());
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let ark_dir = file.workspace.ark_dir.trim_start_matches("./").trim_end_matches('/');
    patterns.push(format!("/{ark_dir}/"));
    patterns.push(".git/".to_string());

    PatternSet::compile(&patterns)
}

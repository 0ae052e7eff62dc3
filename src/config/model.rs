// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::target::TargetSpec;

/// Top-level workspace file as read from `ark.toml`.
///
/// ```toml
/// [workspace]
/// ignore = ["node_modules/"]
///
/// [package.web.target.local_exec.build]
/// source_files = ["src"]
/// command = ["sh", "-c", "cp -r src \"$ARK_ARTIFACTS_DIR\"/"]
/// ```
///
/// Target tables stay untyped here; the common keys are split off during
/// validation and everything else becomes a raw attribute.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawWorkspaceFile {
    #[serde(default)]
    pub workspace: WorkspaceSection,

    #[serde(default)]
    pub artifacts: Option<ArtifactsSection>,

    /// `[package.<name>]` tables.
    #[serde(default)]
    pub package: BTreeMap<String, RawPackage>,
}

/// `[workspace]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSection {
    /// Local state directory, relative to the workspace root.
    #[serde(default = "default_ark_dir")]
    pub ark_dir: String,

    /// Repository-wide ignore rules, gitignore syntax.
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Walker pool size; defaults to the number of CPUs.
    #[serde(default)]
    pub concurrency: Option<usize>,

    /// Observer debounce window in milliseconds.
    #[serde(default = "default_coalesce_ms")]
    pub coalesce_ms: u64,

    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: usize,
}

fn default_ark_dir() -> String {
    ".ark".to_string()
}

fn default_coalesce_ms() -> u64 {
    100
}

fn default_max_archive_bytes() -> usize {
    crate::sync::DEFAULT_MAX_ARCHIVE_BYTES
}

impl Default for WorkspaceSection {
    fn default() -> Self {
        Self {
            ark_dir: default_ark_dir(),
            ignore: Vec::new(),
            concurrency: None,
            coalesce_ms: default_coalesce_ms(),
            max_archive_bytes: default_max_archive_bytes(),
        }
    }
}

/// `[artifacts]` section: the remote artifact cache.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArtifactsSection {
    /// Directory acting as the remote bucket. Relative paths resolve against
    /// the workspace root.
    pub storage_dir: String,

    #[serde(default)]
    pub push_errors_fatal: bool,
}

/// `[package.<name>]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawPackage {
    #[serde(default)]
    pub description: String,

    /// Package directory relative to the workspace root; defaults to the
    /// package name.
    #[serde(default)]
    pub dir: Option<String>,

    /// `target.<kind>.<name>` tables.
    #[serde(default)]
    pub target: BTreeMap<String, BTreeMap<String, toml::Table>>,
}

/// Validated workspace file.
#[derive(Debug, Clone)]
pub struct WorkspaceFile {
    pub workspace: WorkspaceSection,
    pub artifacts: Option<ArtifactsSection>,
    pub packages: BTreeMap<String, PackageDecl>,
}

/// Validated package with its target declarations.
#[derive(Debug, Clone)]
pub struct PackageDecl {
    pub name: String,
    pub description: String,
    /// Relative to the workspace root, forward slashes.
    pub dir: String,
    pub targets: Vec<TargetSpec>,
}

impl WorkspaceFile {
    /// Internal constructor used by validation.
    pub(crate) fn new_unchecked(
        workspace: WorkspaceSection,
        artifacts: Option<ArtifactsSection>,
        packages: BTreeMap<String, PackageDecl>,
    ) -> Self {
        Self {
            workspace,
            artifacts,
            packages,
        }
    }

    pub fn target_count(&self) -> usize {
        self.packages.values().map(|p| p.targets.len()).sum()
    }
}

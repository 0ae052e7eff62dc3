// src/patterns.rs

//! Gitignore-style pattern matching.
//!
//! Paths handed to this module are relative to the workspace root and use
//! forward slashes (e.g. `"src/foo/bar.ts"`).
//!
//! Pattern rules:
//! - `*` never crosses a `/`; `**` matches any number of directories.
//! - a pattern without a slash (e.g. `*.log`, `node_modules`) matches at any
//!   depth, against the basename of a file or of any parent directory.
//! - a leading `/` anchors the pattern to the root.
//! - a trailing `/` restricts the pattern to directories; files below a
//!   matching directory match too.

use std::fmt;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::errors::{ArkError, Result};

/// A compiled list of gitignore-style patterns.
#[derive(Clone)]
pub struct PatternSet {
    patterns: Vec<String>,
    /// Patterns that may match files as well as directories.
    any: GlobSet,
    /// Patterns that only match directories (trailing slash).
    dirs: GlobSet,
}

impl fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternSet")
            .field("patterns", &self.patterns)
            .finish_non_exhaustive()
    }
}

impl Default for PatternSet {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            any: GlobSet::empty(),
            dirs: GlobSet::empty(),
        }
    }
}

impl PatternSet {
    /// Compile patterns; any invalid glob is a `ConfigError`.
    pub fn compile<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut any = GlobSetBuilder::new();
        let mut dirs = GlobSetBuilder::new();
        let mut kept = Vec::new();

        for raw in patterns {
            let raw = raw.as_ref().trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            kept.push(raw.to_string());

            let (body, dir_only) = match raw.strip_suffix('/') {
                Some(stripped) => (stripped, true),
                None => (raw, false),
            };
            let glob_src = if let Some(anchored) = body.strip_prefix('/') {
                anchored.to_string()
            } else if body.contains('/') || body == "**" {
                body.to_string()
            } else {
                format!("**/{body}")
            };

            let glob = GlobBuilder::new(&glob_src)
                .literal_separator(true)
                .build()
                .map_err(|e| ArkError::ConfigError(format!("invalid pattern {raw:?}: {e}")))?;

            if dir_only {
                dirs.add(glob);
            } else {
                any.add(glob);
            }
        }

        let any = any
            .build()
            .map_err(|e| ArkError::ConfigError(format!("compiling patterns: {e}")))?;
        let dirs = dirs
            .build()
            .map_err(|e| ArkError::ConfigError(format!("compiling patterns: {e}")))?;

        Ok(Self {
            patterns: kept,
            any,
            dirs,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether a directory (relative path) matches.
    pub fn matches_dir(&self, rel_dir: &str) -> bool {
        self.any.is_match(rel_dir) || self.dirs.is_match(rel_dir)
    }

    /// Whether a file matches, directly or through one of its parent
    /// directories.
    pub fn matches_file(&self, rel: &str) -> bool {
        if self.any.is_match(rel) {
            return true;
        }
        parent_dirs(rel).any(|dir| self.matches_dir(dir))
    }
}

/// `"a/b/c.txt"` → `"a"`, `"a/b"`.
fn parent_dirs(rel: &str) -> impl Iterator<Item = &str> {
    rel.match_indices('/').map(move |(idx, _)| &rel[..idx])
}

/// One source declaration: path prefixes narrowed by include and exclude
/// patterns.
#[derive(Debug, Clone, Default)]
pub struct SourceRule {
    prefixes: Vec<String>,
    includes: PatternSet,
    excludes: PatternSet,
}

impl SourceRule {
    pub fn new<S: AsRef<str>>(prefixes: &[S], includes: &[S], excludes: &[S]) -> Result<Self> {
        Ok(Self {
            prefixes: prefixes.iter().map(|p| normalize_prefix(p.as_ref())).collect(),
            includes: PatternSet::compile(includes)?,
            excludes: PatternSet::compile(excludes)?,
        })
    }

    /// Keeps every path that matches `includes` and no `excludes`.
    pub fn patterns<S: AsRef<str>>(includes: &[S], excludes: &[S]) -> Result<Self> {
        Self::new(&[] as &[S], includes, excludes)
    }

    /// Decide whether `rel` belongs to this rule.
    ///
    /// With neither prefixes nor includes the rule keeps nothing.
    pub fn check(&self, rel: &str) -> bool {
        let has_prefixes = !self.prefixes.is_empty();
        let has_includes = !self.includes.is_empty();
        if !has_prefixes && !has_includes {
            return false;
        }
        if has_prefixes && !self.prefixes.iter().any(|p| under_prefix(rel, p)) {
            return false;
        }
        if has_includes && !self.includes.matches_file(rel) {
            return false;
        }
        !self.excludes.matches_file(rel)
    }
}

fn normalize_prefix(p: &str) -> String {
    let p = p.trim().trim_start_matches("./").trim_end_matches('/');
    if p == "." { String::new() } else { p.to_string() }
}

fn under_prefix(rel: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || rel == prefix
        || (rel.starts_with(prefix) && rel.as_bytes().get(prefix.len()) == Some(&b'/'))
}

/// Per-subscriber filter: a union of source rules minus repository-wide
/// ignore rules.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    rules: Vec<SourceRule>,
    ignores: PatternSet,
}

impl FileFilter {
    pub fn new(rules: Vec<SourceRule>, ignores: PatternSet) -> Self {
        Self { rules, ignores }
    }

    /// Filter keeping everything that is not ignored.
    pub fn everything(ignores: PatternSet) -> Result<Self> {
        Ok(Self {
            rules: vec![SourceRule::patterns(&["**"], &[])?],
            ignores,
        })
    }

    pub fn ignores(&self) -> &PatternSet {
        &self.ignores
    }

    pub fn keeps(&self, rel: &str) -> bool {
        !self.ignores.matches_file(rel) && self.rules.iter().any(|r| r.check(rel))
    }

    /// Whether the scanner should walk into `rel_dir` at all.
    pub fn should_descend(&self, rel_dir: &str) -> bool {
        !self.ignores.matches_dir(rel_dir)
    }
}

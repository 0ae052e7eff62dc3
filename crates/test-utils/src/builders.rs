#![allow(dead_code)]

use std::fs;
use std::path::Path;

use tempfile::TempDir;

/// Writes a scratch workspace (`ark.toml` plus source files) into a temp
/// directory.
///
/// ```ignore
/// let dir = WorkspaceBuilder::new()
///     .file("app/src/main.txt", "hello")
///     .target("app", "recording", "lib", r#"source_files = ["src"]"#)
///     .target("app", "recording", "bin", r#"depends_on = ["app.recording.lib"]"#)
///     .build();
/// ```
pub struct WorkspaceBuilder {
    header: String,
    targets: Vec<String>,
    files: Vec<(String, Vec<u8>)>,
}

impl WorkspaceBuilder {
    pub fn new() -> Self {
        Self {
            header: String::new(),
            targets: Vec::new(),
            files: Vec::new(),
        }
    }

    /// Raw TOML prepended to the generated file (`[workspace]`,
    /// `[artifacts]`, `[package.x]` tables).
    pub fn raw(mut self, toml: &str) -> Self {
        self.header.push_str(toml);
        self.header.push('\n');
        self
    }

    /// `[package.<package>.target.<kind>.<name>]` with `body` as its keys.
    pub fn target(mut self, package: &str, kind: &str, name: &str, body: &str) -> Self {
        self.targets
            .push(format!("[package.{package}.target.{kind}.{name}]\n{body}\n"));
        self
    }

    pub fn file(mut self, rel: &str, contents: impl AsRef<[u8]>) -> Self {
        self.files.push((rel.to_string(), contents.as_ref().to_vec()));
        self
    }

    pub fn toml(&self) -> String {
        let mut out = self.header.clone();
        for t in &self.targets {
            out.push('\n');
            out.push_str(t);
        }
        out
    }

    pub fn build(self) -> TempDir {
        let dir = tempfile::tempdir().expect("create temp workspace");
        self.write_into(dir.path());
        dir
    }

    pub fn write_into(self, root: &Path) {
        fs::write(root.join("ark.toml"), self.toml()).expect("write ark.toml");
        for (rel, contents) in &self.files {
            write_file(root, rel, contents);
        }
    }
}

impl Default for WorkspaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Create `root/rel` (and its parents) with `contents`.
pub fn write_file(root: &Path, rel: &str, contents: impl AsRef<[u8]>) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create parent dirs");
    }
    fs::write(&path, contents).expect("write file");
}

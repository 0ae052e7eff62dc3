// src/config/mod.rs

//! Workspace file (`ark.toml`) and entrypoint environment.

pub mod env;
pub mod loader;
pub mod model;
pub mod validate;

pub use env::EntrypointEnv;
pub use loader::{WORKSPACE_FILE, find_workspace_root, load_and_validate, load_from_path};
pub use model::{ArtifactsSection, PackageDecl, RawPackage, RawWorkspaceFile, WorkspaceFile, WorkspaceSection};

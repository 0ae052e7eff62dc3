// src/target/mod.rs

//! Targets, their capability contracts and the built-in kinds.
//!
//! - [`address`]: `package.kind.name` identifiers.
//! - [`capability`]: the `Addressable` / `Buildable` / `Cacheable` traits.
//! - [`model`]: the concrete [`Target`] every kind shares.
//! - [`kind`]: the plug-in trait and registry for kinds.
//! - [`eval`]: `${...}` attribute expressions.
//! - [`registry`]: the arena all targets live in.

pub mod address;
pub mod capability;
pub mod context;
pub mod eval;
pub mod kind;
pub mod kinds;
pub mod model;
pub mod registry;

pub use address::Address;
pub use capability::{Addressable, Buildable, Cacheable, Capabilities};
pub use context::{BoxFuture, BuildContext, PackageInfo, WorkspaceInfo};
pub use eval::Interpolator;
pub use kind::{BuildRequest, KindRegistry, TargetKind, decode_attributes};
pub use model::{Target, TargetSpec};
pub use registry::{TargetId, TargetRegistry};

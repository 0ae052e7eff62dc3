// src/engine/mod.rs

//! Graph walking.
//!
//! The pure scheduling state machine lives in [`crate::dag::scheduler`];
//! [`walk`] is the async shell that dispatches visits onto tokio tasks and
//! [`build`] is the standard build visit.

pub mod build;
pub mod walk;

pub use build::{BuildWalker, VisitResult};
pub use walk::{WalkOptions, WalkReport, topo_walk};

// src/dag/mod.rs

//! Target graph and walk scheduling.
//!
//! - [`graph`] holds the petgraph-backed DAG over the target registry.
//! - [`scheduler`] contains the walk state machine that decides which
//!   vertices are ready and which are skipped.
//! - [`vertex`] provides per-vertex walk state.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages state transitions.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod vertex;

pub use graph::DagGraph;
pub use scheduler::WalkScheduler;
pub use scheduler_step::SchedulerStep;
pub use vertex::{VertexRunState, VisitOutcome};

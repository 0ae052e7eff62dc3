// src/dag/vertex.rs

//! Per-walk state of a graph vertex.

use crate::target::Address;

/// Walk state of a vertex (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting on dependencies.
    Pending,
    /// Handed to a visitor.
    Running,
    DoneSuccess,
    DoneFailed,
    /// Never visited: an upstream vertex failed, or the walk was halted.
    Skipped,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunState::Pending | RunState::Running)
    }
}

/// Public, read-only view of a vertex's walk state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexRunState {
    /// The walk has not started yet.
    NotInWalk,
    Pending,
    Running,
    DoneSuccess,
    DoneFailed,
    Skipped,
}

impl From<Option<RunState>> for VertexRunState {
    fn from(state: Option<RunState>) -> Self {
        match state {
            None => VertexRunState::NotInWalk,
            Some(RunState::Pending) => VertexRunState::Pending,
            Some(RunState::Running) => VertexRunState::Running,
            Some(RunState::DoneSuccess) => VertexRunState::DoneSuccess,
            Some(RunState::DoneFailed) => VertexRunState::DoneFailed,
            Some(RunState::Skipped) => VertexRunState::Skipped,
        }
    }
}

/// Static vertex information plus walk state.
#[derive(Debug, Clone)]
pub struct VertexInfo {
    pub address: Address,
    /// Direct dependencies inside the walked graph.
    pub deps: Vec<Address>,
    /// Direct dependents inside the walked graph.
    pub dependents: Vec<Address>,
    pub run_state: Option<RunState>,
}

/// Outcome a visitor reports back for one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    Success,
    Failed,
}

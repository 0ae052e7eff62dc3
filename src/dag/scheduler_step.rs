// src/dag/scheduler_step.rs

use crate::target::Address;

/// Structured result of a single [`WalkScheduler`](crate::dag::WalkScheduler) step.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Vertices whose dependencies all succeeded; the caller should visit
    /// them now.
    pub newly_scheduled: Vec<Address>,
    /// Vertices that will never be visited in this walk.
    pub newly_skipped: Vec<Address>,
    /// Whether every vertex is now terminal.
    pub walk_finished: bool,
}

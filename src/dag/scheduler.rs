// src/dag/scheduler.rs

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::dag::graph::DagGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;
use crate::dag::vertex::{RunState, VertexInfo, VertexRunState, VisitOutcome};
use crate::target::Address;

/// Pure state machine behind a dependencies-first walk.
///
/// It decides which vertices are ready (every dependency succeeded), skips
/// the dependents of failed vertices, and reports when the walk is over.
/// It never runs anything itself; see [`crate::engine::topo_walk`].
#[derive(Debug)]
pub struct WalkScheduler {
    vertices: BTreeMap<Address, VertexInfo>,
    started: bool,
    halted: bool,
}

impl WalkScheduler {
    pub fn new(graph: &DagGraph) -> Self {
        let vertices = graph
            .sorted_addresses()
            .into_iter()
            .map(|address| {
                let info = VertexInfo {
                    deps: graph.dependencies_of(&address),
                    dependents: graph.dependents_of(&address),
                    address: address.clone(),
                    run_state: None,
                };
                (address, info)
            })
            .collect();

        Self {
            vertices,
            started: false,
            halted: false,
        }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn run_state_of(&self, address: &Address) -> Option<VertexRunState> {
        let info = self.vertices.get(address)?;
        Some(info.run_state.into())
    }

    pub fn is_finished(&self) -> bool {
        self.started
            && self
                .vertices
                .values()
                .all(|info| info.run_state.is_some_and(RunState::is_terminal))
    }

    /// Put every vertex in `Pending` and return the initial ready set.
    pub fn start(&mut self) -> SchedulerStep {
        if self.started {
            warn!("walk already started; ignoring");
            return SchedulerStep::default();
        }
        self.started = true;

        let mut manager = StateManager::new(&mut self.vertices);
        manager.mark_all_pending();
        let newly_scheduled = manager.collect_new_ready();
        let walk_finished = manager.all_terminal();

        debug!(vertices = self.vertices.len(), ready = newly_scheduled.len(), "walk started");

        SchedulerStep {
            newly_scheduled,
            newly_skipped: Vec::new(),
            walk_finished,
        }
    }

    /// Record the outcome of a visit and return what became ready or skipped.
    pub fn step_completion(&mut self, address: &Address, outcome: VisitOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        match self.vertices.get_mut(address) {
            Some(info) if info.run_state == Some(RunState::Running) => match outcome {
                VisitOutcome::Success => {
                    info.run_state = Some(RunState::DoneSuccess);
                    if !self.halted {
                        let mut manager = StateManager::new(&mut self.vertices);
                        step.newly_scheduled = manager.collect_new_ready();
                    }
                }
                VisitOutcome::Failed => {
                    info.run_state = Some(RunState::DoneFailed);
                    let mut manager = StateManager::new(&mut self.vertices);
                    step.newly_skipped = manager.skip_dependents(address);
                    if !step.newly_skipped.is_empty() {
                        info!(
                            vertex = %address,
                            skipped = step.newly_skipped.len(),
                            "visit failed; skipping dependents"
                        );
                    }
                }
            },
            Some(info) => {
                warn!(vertex = %address, state = ?info.run_state, "completion for a vertex that is not running; ignoring");
            }
            None => {
                warn!(vertex = %address, "completion for unknown vertex; ignoring");
            }
        }

        step.walk_finished = StateManager::new(&mut self.vertices).all_terminal();
        step
    }

    /// Stop scheduling: every vertex that has not started is skipped.
    /// Running vertices still report their completion.
    pub fn halt(&mut self) -> SchedulerStep {
        self.halted = true;
        let mut manager = StateManager::new(&mut self.vertices);
        let newly_skipped = manager.skip_all_pending();
        let walk_finished = manager.all_terminal();
        SchedulerStep {
            newly_scheduled: Vec::new(),
            newly_skipped,
            walk_finished,
        }
    }
}

// src/dag/state_manager.rs

//! Walk state transitions for the vertices of a [`WalkScheduler`](crate::dag::WalkScheduler).

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, warn};

use crate::dag::vertex::{RunState, VertexInfo};
use crate::target::Address;

pub struct StateManager<'a> {
    vertices: &'a mut BTreeMap<Address, VertexInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(vertices: &'a mut BTreeMap<Address, VertexInfo>) -> Self {
        Self { vertices }
    }

    pub fn mark_all_pending(&mut self) {
        for info in self.vertices.values_mut() {
            info.run_state = Some(RunState::Pending);
        }
    }

    fn deps_satisfied(&self, info: &VertexInfo) -> bool {
        info.deps.iter().all(|dep| match self.vertices.get(dep) {
            Some(d) => d.run_state == Some(RunState::DoneSuccess),
            None => {
                warn!(vertex = %info.address, dep = %dep, "dependency missing from walk");
                false
            }
        })
    }

    /// Mark every transitive dependent of `failed` that has not started as
    /// `Skipped`, returning them in lexical order.
    pub fn skip_dependents(&mut self, failed: &Address) -> Vec<Address> {
        let mut stack: Vec<Address> = self
            .vertices
            .get(failed)
            .map(|info| info.dependents.clone())
            .unwrap_or_default();
        let mut seen: HashSet<Address> = HashSet::new();
        let mut skipped = Vec::new();

        while let Some(address) = stack.pop() {
            if !seen.insert(address.clone()) {
                continue;
            }
            if let Some(info) = self.vertices.get_mut(&address) {
                if info.run_state == Some(RunState::Pending) {
                    info.run_state = Some(RunState::Skipped);
                    debug!(vertex = %address, upstream = %failed, "skipping; upstream failed");
                    skipped.push(address.clone());
                    stack.extend(info.dependents.iter().cloned());
                }
            }
        }

        skipped.sort();
        skipped
    }

    /// Mark every `Pending` vertex `Skipped`.
    pub fn skip_all_pending(&mut self) -> Vec<Address> {
        let mut skipped = Vec::new();
        for info in self.vertices.values_mut() {
            if info.run_state == Some(RunState::Pending) {
                info.run_state = Some(RunState::Skipped);
                skipped.push(info.address.clone());
            }
        }
        skipped
    }

    /// Pending vertices whose dependencies all succeeded become `Running`.
    /// Returned in lexical order.
    pub fn collect_new_ready(&mut self) -> Vec<Address> {
        let candidates: Vec<Address> = self
            .vertices
            .values()
            .filter(|info| info.run_state == Some(RunState::Pending) && self.deps_satisfied(info))
            .map(|info| info.address.clone())
            .collect();

        for address in &candidates {
            if let Some(info) = self.vertices.get_mut(address) {
                debug!(vertex = %address, "dependencies satisfied; marking Running");
                info.run_state = Some(RunState::Running);
            }
        }

        candidates
    }

    pub fn all_terminal(&self) -> bool {
        self.vertices
            .values()
            .all(|info| info.run_state.is_some_and(RunState::is_terminal))
    }
}

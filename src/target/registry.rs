// src/target/registry.rs

use std::collections::HashMap;
use std::sync::Arc;

use crate::errors::{ArkError, Result};
use crate::target::address::Address;
use crate::target::model::Target;

/// Index of a target inside its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub usize);

/// Flat arena of targets keyed by address.
///
/// Filled once at load and only read afterwards.
#[derive(Debug, Default)]
pub struct TargetRegistry {
    targets: Vec<Arc<Target>>,
    index: HashMap<Address, TargetId>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target; a second target with the same address is a graph error.
    pub fn insert(&mut self, target: Target) -> Result<TargetId> {
        let address = target.spec().address.clone();
        if self.index.contains_key(&address) {
            return Err(ArkError::GraphError(format!("duplicate address {address}")));
        }
        let id = TargetId(self.targets.len());
        self.targets.push(Arc::new(target));
        self.index.insert(address, id);
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn id_of(&self, address: &Address) -> Option<TargetId> {
        self.index.get(address).copied()
    }

    pub fn get(&self, id: TargetId) -> Option<&Arc<Target>> {
        self.targets.get(id.0)
    }

    pub fn lookup(&self, address: &Address) -> Result<&Arc<Target>> {
        self.id_of(address)
            .and_then(|id| self.get(id))
            .ok_or_else(|| ArkError::NotFound(address.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (TargetId, &Arc<Target>)> {
        self.targets.iter().enumerate().map(|(i, t)| (TargetId(i), t))
    }

    /// All addresses in lexical order.
    pub fn sorted_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.index.keys().cloned().collect();
        addresses.sort();
        addresses
    }
}

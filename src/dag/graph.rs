// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::dot::{Config, Dot};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};
use serde::Serialize;

use crate::errors::{ArkError, Result};
use crate::target::{Address, Target, TargetId, TargetRegistry};

/// Directed acyclic graph over (a subset of) a registry.
///
/// Nodes carry registry indices; an edge `a -> b` means `b` depends on `a`,
/// so a topological order lists dependencies first.
#[derive(Clone)]
pub struct DagGraph {
    registry: Arc<TargetRegistry>,
    graph: DiGraph<TargetId, ()>,
    nodes: HashMap<TargetId, NodeIndex>,
}

impl fmt::Debug for DagGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DagGraph")
            .field("vertices", &self.sorted_addresses())
            .finish()
    }
}

impl DagGraph {
    /// Build the graph of every target in `registry`.
    ///
    /// Fails with `GraphError` on a reference to an unknown address or on a
    /// cycle.
    pub fn from_registry(registry: Arc<TargetRegistry>) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();

        for address in registry.sorted_addresses() {
            if let Some(id) = registry.id_of(&address) {
                nodes.insert(id, graph.add_node(id));
            }
        }

        for (id, target) in registry.iter() {
            for dep in target.dependencies() {
                let dep_id = registry.id_of(dep).ok_or_else(|| {
                    ArkError::GraphError(format!(
                        "{} references unknown address {dep}",
                        target.address_str()
                    ))
                })?;
                if dep_id == id {
                    return Err(ArkError::GraphError(format!(
                        "{} references itself",
                        target.address_str()
                    )));
                }
                graph.add_edge(nodes[&dep_id], nodes[&id], ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            let id = graph[cycle.node_id()];
            let address = registry
                .get(id)
                .map(|t| t.address_str().to_string())
                .unwrap_or_default();
            return Err(ArkError::GraphError(format!(
                "cycle detected in target graph involving {address}"
            )));
        }

        Ok(Self {
            registry,
            graph,
            nodes,
        })
    }

    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    fn node_of(&self, address: &Address) -> Result<NodeIndex> {
        self.registry
            .id_of(address)
            .and_then(|id| self.nodes.get(&id).copied())
            .ok_or_else(|| ArkError::NotFound(address.to_string()))
    }

    fn target_at(&self, node: NodeIndex) -> Option<&Arc<Target>> {
        self.registry.get(self.graph[node])
    }

    fn address_at(&self, node: NodeIndex) -> Option<Address> {
        self.target_at(node).map(|t| t.spec().address.clone())
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.node_of(address).is_ok()
    }

    pub fn lookup_by_address(&self, address: &Address) -> Result<Arc<Target>> {
        let node = self.node_of(address)?;
        self.target_at(node)
            .cloned()
            .ok_or_else(|| ArkError::NotFound(address.to_string()))
    }

    /// Vertices in lexical order.
    pub fn sorted_addresses(&self) -> Vec<Address> {
        let mut out: Vec<Address> = self
            .graph
            .node_indices()
            .filter_map(|n| self.address_at(n))
            .collect();
        out.sort();
        out
    }

    fn neighbors(&self, address: &Address, dir: Direction) -> Vec<Address> {
        let Ok(node) = self.node_of(address) else {
            return Vec::new();
        };
        let mut out: Vec<Address> = self
            .graph
            .neighbors_directed(node, dir)
            .filter_map(|n| self.address_at(n))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Direct dependencies of `address` inside this graph.
    pub fn dependencies_of(&self, address: &Address) -> Vec<Address> {
        self.neighbors(address, Direction::Incoming)
    }

    /// Direct dependents of `address` inside this graph.
    pub fn dependents_of(&self, address: &Address) -> Vec<Address> {
        self.neighbors(address, Direction::Outgoing)
    }

    /// Induced sub-graph of `root` and everything it transitively depends on.
    pub fn isolate(&self, root: &Address) -> Result<DagGraph> {
        let start = self.node_of(root)?;

        let mut keep: BTreeSet<(Address, TargetId)> = BTreeSet::new();
        let reversed = Reversed(&self.graph);
        let mut dfs = Dfs::new(reversed, start);
        while let Some(node) = dfs.next(reversed) {
            if let Some(address) = self.address_at(node) {
                keep.insert((address, self.graph[node]));
            }
        }

        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for (_, id) in &keep {
            nodes.insert(*id, graph.add_node(*id));
        }
        for edge in self.graph.raw_edges() {
            let from = self.graph[edge.source()];
            let to = self.graph[edge.target()];
            if let (Some(&a), Some(&b)) = (nodes.get(&from), nodes.get(&to)) {
                graph.add_edge(a, b, ());
            }
        }

        Ok(DagGraph {
            registry: Arc::clone(&self.registry),
            graph,
            nodes,
        })
    }

    /// Dependencies-first order; ties broken lexically.
    pub fn topo_order(&self) -> Vec<Address> {
        let mut remaining: HashMap<NodeIndex, usize> = self
            .graph
            .node_indices()
            .map(|n| (n, self.graph.neighbors_directed(n, Direction::Incoming).count()))
            .collect();
        let mut ready: BTreeSet<(Address, NodeIndex)> = remaining
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .filter_map(|(n, _)| self.address_at(*n).map(|a| (a, *n)))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some((address, node)) = ready.pop_first() {
            order.push(address);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                if let Some(deg) = remaining.get_mut(&next) {
                    *deg -= 1;
                    if *deg == 0 {
                        if let Some(a) = self.address_at(next) {
                            ready.insert((a, next));
                        }
                    }
                }
            }
        }
        order
    }

    /// Graphviz rendering; edges point from dependency to dependent.
    pub fn dot(&self) -> String {
        let labelled = self.graph.map(
            |_, id| {
                self.registry
                    .get(*id)
                    .map(|t| t.address_str().to_string())
                    .unwrap_or_default()
            },
            |_, _| String::new(),
        );
        format!("{}", Dot::with_config(&labelled, &[Config::EdgeNoLabel]))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Serialize)]
struct VertexView {
    address: Address,
    kind: String,
    dependencies: Vec<Address>,
}

impl Serialize for DagGraph {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let vertices: Vec<VertexView> = self
            .sorted_addresses()
            .into_iter()
            .map(|address| VertexView {
                kind: address.kind().to_string(),
                dependencies: self.dependencies_of(&address),
                address,
            })
            .collect();
        #[derive(Serialize)]
        struct GraphView {
            vertices: Vec<VertexView>,
        }
        GraphView { vertices }.serialize(serializer)
    }
}

impl fmt::Display for DagGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for address in self.topo_order() {
            let deps = self.dependencies_of(&address);
            if deps.is_empty() {
                writeln!(f, "{address}")?;
            } else {
                let deps: Vec<String> = deps.iter().map(ToString::to_string).collect();
                writeln!(f, "{address} <- {}", deps.join(", "))?;
            }
        }
        Ok(())
    }
}

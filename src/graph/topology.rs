//! Adjacency structure for the shared graph.
//!
//! Node and edge payloads live in [super::Graph]; this index only tracks which identifiers are
//! connected so incident edges and neighbours can be found without scanning every edge.

use petgraph::{
    stable_graph::{EdgeIndex, NodeIndex, StableDiGraph},
    visit::EdgeRef,
    Direction,
};
use std::collections::BTreeMap;

use crate::properties::Identifier;

#[derive(Debug, Clone, Default)]
pub struct Topology {
    graph: StableDiGraph<Identifier, Identifier>,
    node_index: BTreeMap<Identifier, NodeIndex>,
    edge_index: BTreeMap<Identifier, EdgeIndex>,
}

impl Topology {
    pub fn contains_node(&self, id: &Identifier) -> bool {
        self.node_index.contains_key(id)
    }

    pub fn contains_edge(&self, id: &Identifier) -> bool {
        self.edge_index.contains_key(id)
    }

    pub fn add_node(&mut self, id: &Identifier) -> NodeIndex {
        if let Some(idx) = self.node_index.get(id) {
            return *idx;
        }
        let idx = self.graph.add_node(id.clone());
        self.node_index.insert(id.clone(), idx);
        idx
    }

    /// Remove a node. Edges still attached to it are dropped from the index too; their
    /// identifiers are returned so the caller can tell if it missed any.
    pub fn remove_node(&mut self, id: &Identifier) -> Vec<Identifier> {
        let Some(idx) = self.node_index.remove(id) else {
            return vec![];
        };
        let orphaned = self.incident_edges(idx);
        for edge_id in orphaned.iter() {
            self.edge_index.remove(edge_id);
        }
        self.graph.remove_node(idx);
        orphaned
    }

    /// Link `parent -> child`. Both endpoints must already be indexed.
    pub fn add_edge(&mut self, id: &Identifier, parent: &Identifier, child: &Identifier) -> bool {
        if self.edge_index.contains_key(id) {
            return true;
        }
        let (Some(&p), Some(&c)) = (self.node_index.get(parent), self.node_index.get(child)) else {
            return false;
        };
        let idx = self.graph.add_edge(p, c, id.clone());
        self.edge_index.insert(id.clone(), idx);
        true
    }

    pub fn remove_edge(&mut self, id: &Identifier) -> bool {
        match self.edge_index.remove(id) {
            Some(idx) => self.graph.remove_edge(idx).is_some(),
            None => false,
        }
    }

    /// Identifiers of every edge with `id` as parent or child.
    pub fn edges_of(&self, id: &Identifier) -> Vec<Identifier> {
        match self.node_index.get(id) {
            Some(idx) => self.incident_edges(*idx),
            None => vec![],
        }
    }

    /// Neighbouring node identifiers. [Direction::Outgoing] yields children,
    /// [Direction::Incoming] yields parents.
    pub fn neighbors(&self, id: &Identifier, direction: Direction) -> Vec<Identifier> {
        let Some(idx) = self.node_index.get(id) else {
            return vec![];
        };
        let mut found = self
            .graph
            .neighbors_directed(*idx, direction)
            .map(|n| self.graph[n].clone())
            .collect::<Vec<_>>();
        found.sort();
        found.dedup();
        found
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    fn incident_edges(&self, idx: NodeIndex) -> Vec<Identifier> {
        let mut ids = self
            .graph
            .edges_directed(idx, Direction::Outgoing)
            .chain(self.graph.edges_directed(idx, Direction::Incoming))
            .map(|e| e.weight().clone())
            .collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        ids
    }
}

//! Graph: the shared, origin-partitioned topology.
//!
//! All mutating operations take `&mut self`, so they can only be reached through the exclusive
//! side of the [SharedGraph] lock. Holding `shared.write()` is the graph's `Lock()`; dropping the
//! guard is `Unlock()`. Lookups used to decide whether an "added" operation is a replay must be
//! made through the same guard as the mutation that follows them.

use parking_lot::RwLock;
use petgraph::Direction;
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};
use tokio::sync::mpsc::UnboundedSender;

use crate::{
    backend::{Backend, DirectGuard, MemoryBackend},
    error::TopologyError,
    event::GraphEvent,
    properties::{Edge, Identifier, Node},
};

use super::topology::Topology;

/// The process-wide graph handle shared by every connection.
pub type SharedGraph = Arc<RwLock<Graph>>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct OriginIndex {
    nodes: BTreeSet<Identifier>,
    edges: BTreeSet<Identifier>,
}

impl OriginIndex {
    fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// Counts of what a [Graph::del_origin_graph] call removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OriginPurge {
    pub nodes: usize,
    pub edges: usize,
}

pub struct Graph {
    nodes: BTreeMap<Identifier, Node>,
    edges: BTreeMap<Identifier, Edge>,
    topology: Topology,
    origins: BTreeMap<String, OriginIndex>,
    backend: Arc<dyn Backend>,
    tx: Option<UnboundedSender<GraphEvent>>,
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.nodes.len())
            .field("edges", &self.edges.len())
            .field("origins", &self.origins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Graph({} nodes, {} edges, {} origins)",
            self.nodes.len(),
            self.edges.len(),
            self.origins.len()
        )
    }
}

impl Default for Graph {
    fn default() -> Graph {
        Graph::new(Arc::new(MemoryBackend::new()))
    }
}

impl Graph {
    pub fn new(backend: Arc<dyn Backend>) -> Graph {
        Graph {
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
            topology: Topology::default(),
            origins: BTreeMap::new(),
            backend,
            tx: None,
        }
    }

    pub fn with_event_tx(mut self, tx: UnboundedSender<GraphEvent>) -> Graph {
        self.tx = Some(tx);
        self
    }

    pub fn set_event_tx(&mut self, tx: Option<UnboundedSender<GraphEvent>>) {
        self.tx = tx;
    }

    /// Wrap the graph in the lock every connection shares.
    pub fn into_shared(self) -> SharedGraph {
        Arc::new(RwLock::new(self))
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    // === LOOKUPS ===

    pub fn get_node(&self, id: &Identifier) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_edge(&self, id: &Identifier) -> Option<&Edge> {
        self.edges.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    /// Origins that currently own at least one node or edge.
    pub fn origins(&self) -> Vec<&str> {
        self.origins.keys().map(|o| o.as_str()).collect()
    }

    pub fn origin_nodes(&self, origin: &str) -> Vec<&Node> {
        self.origins
            .get(origin)
            .map(|idx| idx.nodes.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn origin_edges(&self, origin: &str) -> Vec<&Edge> {
        self.origins
            .get(origin)
            .map(|idx| idx.edges.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    /// Every edge having `id` as parent or child.
    pub fn node_edges(&self, id: &Identifier) -> Vec<&Edge> {
        self.topology
            .edges_of(id)
            .iter()
            .filter_map(|edge_id| self.edges.get(edge_id))
            .collect()
    }

    pub fn lookup_children(&self, id: &Identifier) -> Vec<&Node> {
        self.topology
            .neighbors(id, Direction::Outgoing)
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .collect()
    }

    pub fn lookup_parents(&self, id: &Identifier) -> Vec<&Node> {
        self.topology
            .neighbors(id, Direction::Incoming)
            .iter()
            .filter_map(|parent| self.nodes.get(parent))
            .collect()
    }

    /// Nodes whose metadata field `key` equals `value`.
    pub fn lookup_nodes(&self, key: &str, value: &Value) -> Vec<&Node> {
        self.nodes
            .values()
            .filter(|n| n.metadata.get(key) == Some(value))
            .collect()
    }

    // === NODE MUTATIONS ===

    /// Insert `node` unless a node with the same identifier is already present, in which case the
    /// stored node is left untouched and this is a successful no-op.
    pub fn node_added(&mut self, mut node: Node) -> Result<(), TopologyError> {
        if self.nodes.contains_key(&node.id) {
            tracing::debug!("[Graph] node {} already present, keeping stored version", node.id);
            return Ok(());
        }
        node.stamp();
        self.backend.node_added(&node)?;
        self.topology.add_node(&node.id);
        self.origins
            .entry(node.origin.clone())
            .or_default()
            .nodes
            .insert(node.id.clone());
        self.nodes.insert(node.id.clone(), node.clone());
        self.emit(GraphEvent::NodeAdded(node));
        Ok(())
    }

    /// Replace the metadata of the stored node with the same identifier.
    pub fn node_updated(&mut self, node: &Node) -> Result<(), TopologyError> {
        let Some(stored) = self.nodes.get(&node.id) else {
            return Err(TopologyError::NotFound(format!(
                "cannot update node {}: no such node",
                node.id
            )));
        };
        let mut updated = stored.clone();
        updated.absorb(node);
        self.backend.node_updated(&updated)?;
        self.nodes.insert(updated.id.clone(), updated.clone());
        self.emit(GraphEvent::NodeUpdated(updated));
        Ok(())
    }

    /// Remove the node with `node`'s identifier along with every edge attached to it.
    pub fn node_deleted(&mut self, node: &Node) -> Result<(), TopologyError> {
        if !self.nodes.contains_key(&node.id) {
            return Err(TopologyError::NotFound(format!(
                "cannot delete node {}: no such node",
                node.id
            )));
        }
        self.remove_node(&node.id)
    }

    // === EDGE MUTATIONS ===

    /// Insert `edge` unless an edge with the same identifier already exists. Both endpoints must
    /// be present; an edge is never stored dangling.
    pub fn edge_added(&mut self, mut edge: Edge) -> Result<(), TopologyError> {
        if self.edges.contains_key(&edge.id) {
            tracing::debug!("[Graph] edge {} already present, keeping stored version", edge.id);
            return Ok(());
        }
        for endpoint in [&edge.parent, &edge.child] {
            if !self.nodes.contains_key(endpoint) {
                return Err(TopologyError::Conflict(format!(
                    "cannot add edge {}: endpoint {} does not exist",
                    edge.id, endpoint
                )));
            }
        }
        edge.stamp();
        self.backend.edge_added(&edge)?;
        self.topology.add_edge(&edge.id, &edge.parent, &edge.child);
        self.origins
            .entry(edge.origin.clone())
            .or_default()
            .edges
            .insert(edge.id.clone());
        self.edges.insert(edge.id.clone(), edge.clone());
        self.emit(GraphEvent::EdgeAdded(edge));
        Ok(())
    }

    pub fn edge_updated(&mut self, edge: &Edge) -> Result<(), TopologyError> {
        let Some(stored) = self.edges.get(&edge.id) else {
            return Err(TopologyError::NotFound(format!(
                "cannot update edge {}: no such edge",
                edge.id
            )));
        };
        let mut updated = stored.clone();
        updated.absorb(edge);
        self.backend.edge_updated(&updated)?;
        self.edges.insert(updated.id.clone(), updated.clone());
        self.emit(GraphEvent::EdgeUpdated(updated));
        Ok(())
    }

    pub fn edge_deleted(&mut self, edge: &Edge) -> Result<(), TopologyError> {
        if !self.edges.contains_key(&edge.id) {
            return Err(TopologyError::NotFound(format!(
                "cannot delete edge {}: no such edge",
                edge.id
            )));
        }
        self.remove_edge(&edge.id)
    }

    // === ORIGIN DELETION ===

    /// Remove every node and edge owned by `origin`, plus any edge of another origin that would be
    /// left pointing at one of the removed nodes.
    ///
    /// The backend is held in [crate::backend::BackendMode::Direct] for the whole walk. The set of
    /// entities to remove is computed from the in-memory graph only. Deleting an origin that owns
    /// nothing is a successful no-op.
    ///
    /// The purge is atomic with respect to other graph users, since it runs under the exclusive
    /// lock, but not with respect to backend failures. When a backend write fails the walk stops:
    /// whatever was already removed stays removed and the rest stays in place for the next purge.
    /// The graph never holds a dangling edge at any stopping point.
    pub fn del_origin_graph(&mut self, origin: &str) -> Result<OriginPurge, TopologyError> {
        let Some(index) = self.origins.get(origin).cloned() else {
            tracing::debug!("[Graph] origin {} owns nothing, nothing to delete", origin);
            return Ok(OriginPurge::default());
        };

        let backend = Arc::clone(&self.backend);
        let _direct = DirectGuard::enter(backend.as_ref());

        let mut doomed_edges = index.edges.clone();
        for node_id in index.nodes.iter() {
            doomed_edges.extend(self.topology.edges_of(node_id));
        }

        let mut purge = OriginPurge::default();
        for edge_id in doomed_edges.iter() {
            if self.edges.contains_key(edge_id) {
                self.remove_edge(edge_id)?;
                purge.edges += 1;
            }
        }
        for node_id in index.nodes.iter() {
            if self.nodes.contains_key(node_id) {
                self.remove_node(node_id)?;
                purge.nodes += 1;
            }
        }
        tracing::debug!(
            "[Graph] origin {} deleted: {} nodes, {} edges",
            origin,
            purge.nodes,
            purge.edges
        );
        Ok(purge)
    }

    // === INTERNALS ===

    fn remove_node(&mut self, id: &Identifier) -> Result<(), TopologyError> {
        for edge_id in self.topology.edges_of(id) {
            self.remove_edge(&edge_id)?;
        }
        let Some(node) = self.nodes.get(id) else {
            return Ok(());
        };
        self.backend.node_deleted(node)?;
        let Some(node) = self.nodes.remove(id) else {
            return Ok(());
        };
        let orphaned = self.topology.remove_node(id);
        if !orphaned.is_empty() {
            tracing::warn!("[Graph] node {} removed with untracked edges {:?}", id, orphaned);
        }
        self.unindex_origin(&node.origin, |idx| {
            idx.nodes.remove(id);
        });
        self.emit(GraphEvent::NodeDeleted(node));
        Ok(())
    }

    fn remove_edge(&mut self, id: &Identifier) -> Result<(), TopologyError> {
        let Some(edge) = self.edges.get(id) else {
            return Ok(());
        };
        self.backend.edge_deleted(edge)?;
        let Some(edge) = self.edges.remove(id) else {
            return Ok(());
        };
        self.topology.remove_edge(id);
        self.unindex_origin(&edge.origin, |idx| {
            idx.edges.remove(id);
        });
        self.emit(GraphEvent::EdgeDeleted(edge));
        Ok(())
    }

    fn unindex_origin<F: FnOnce(&mut OriginIndex)>(&mut self, origin: &str, f: F) {
        if let Some(idx) = self.origins.get_mut(origin) {
            f(idx);
            if idx.is_empty() {
                self.origins.remove(origin);
            }
        }
    }

    fn emit(&self, event: GraphEvent) {
        if let Some(tx) = self.tx.as_ref() {
            if let Err(e) = tx.send(event) {
                tracing::debug!("[Graph] event receiver gone: {}", TopologyError::from(e));
            }
        }
    }

    /// Check the structural invariants of the graph, returning a description of each violation.
    ///
    /// Caution! This walks every node and edge.
    pub fn built_in_test(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for edge in self.edges.values() {
            for endpoint in [&edge.parent, &edge.child] {
                if !self.nodes.contains_key(endpoint) {
                    errors.push(format!("edge {} references missing node {}", edge.id, endpoint));
                }
            }
            if !self.topology.contains_edge(&edge.id) {
                errors.push(format!("edge {} missing from topology", edge.id));
            }
        }
        for node in self.nodes.values() {
            if !self.topology.contains_node(&node.id) {
                errors.push(format!("node {} missing from topology", node.id));
            }
        }
        if self.topology.node_count() != self.nodes.len() {
            errors.push(format!(
                "topology holds {} nodes, graph holds {}",
                self.topology.node_count(),
                self.nodes.len()
            ));
        }
        if self.topology.edge_count() != self.edges.len() {
            errors.push(format!(
                "topology holds {} edges, graph holds {}",
                self.topology.edge_count(),
                self.edges.len()
            ));
        }
        let mut indexed_nodes = 0;
        let mut indexed_edges = 0;
        for (origin, idx) in self.origins.iter() {
            indexed_nodes += idx.nodes.len();
            indexed_edges += idx.edges.len();
            for id in idx.nodes.iter() {
                match self.nodes.get(id) {
                    Some(n) if &n.origin == origin => {}
                    _ => errors.push(format!("origin {origin} indexes foreign node {id}")),
                }
            }
            for id in idx.edges.iter() {
                match self.edges.get(id) {
                    Some(e) if &e.origin == origin => {}
                    _ => errors.push(format!("origin {origin} indexes foreign edge {id}")),
                }
            }
        }
        if indexed_nodes != self.nodes.len() || indexed_edges != self.edges.len() {
            errors.push("origin index does not cover every node and edge".to_string());
        }
        errors
    }
}

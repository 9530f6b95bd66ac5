//! Graph module: the shared topology graph and its mutation contract.
//!
//! # Module Organization
//!
//! - [`base`]: [Graph] itself, the per-origin index and cascading origin deletion
//! - [`topology`]: petgraph adjacency index used for incident-edge and neighbour lookups
//!
//! ```rust
//! use topohub_core::graph::{Graph, SharedGraph};
//! use topohub_core::properties::{Metadata, Node};
//!
//! let shared: SharedGraph = Graph::default().into_shared();
//! {
//!     let mut graph = shared.write();
//!     graph.node_added(Node::new("n1", "agent.h1", Metadata::new())).unwrap();
//! }
//! assert!(shared.read().get_node(&"n1".into()).is_some());
//! ```

mod base;
mod topology;

#[cfg(test)]
mod tests;

pub use base::{Graph, OriginPurge, SharedGraph};
pub use topology::Topology;

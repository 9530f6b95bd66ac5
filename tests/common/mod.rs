//! Shared test utilities for integration tests.
//!
//! Import from integration test files as:
//! ```ignore
//! mod common;
//! ```
//!
//! Logging is set up per test by `test_log`.

use serde_json::Value;
use topohub_core::{
    codec::{GraphMessage, StructMessage, SyncMsg, NAMESPACE},
    properties::{Edge, Metadata, Node},
};

#[allow(dead_code)]
pub fn meta(value: Value) -> Metadata {
    value.as_object().cloned().unwrap_or_default()
}

#[allow(dead_code)]
pub fn node(id: &str, origin: &str) -> Node {
    Node::new(id, origin, Metadata::new())
}

#[allow(dead_code)]
pub fn edge(id: &str, origin: &str, parent: &str, child: &str) -> Edge {
    Edge::new(id, origin, parent, child, Metadata::new())
}

/// Envelope for a graph message, as an agent would put it on the wire.
#[allow(dead_code)]
pub fn envelope(msg: GraphMessage) -> StructMessage {
    msg.to_struct_message(NAMESPACE).unwrap()
}

#[allow(dead_code)]
pub fn sync_envelope(nodes: Vec<Node>, edges: Vec<Edge>) -> StructMessage {
    envelope(GraphMessage::Sync(SyncMsg { nodes, edges }))
}

//! Tests for the Graph mutation contract

use super::*;
use crate::{
    backend::{Backend, BackendMode, CachedBackend, MemoryBackend},
    error::TopologyError,
    event::GraphEvent,
    properties::{Edge, Identifier, Metadata, Node},
};
use serde_json::json;
use std::sync::Arc;
use test_log::test;
use tokio::sync::mpsc::unbounded_channel;

fn meta(value: serde_json::Value) -> Metadata {
    value.as_object().cloned().unwrap_or_default()
}

fn node(id: &str, origin: &str) -> Node {
    Node::new(id, origin, Metadata::new())
}

fn edge(id: &str, origin: &str, parent: &str, child: &str) -> Edge {
    Edge::new(id, origin, parent, child, Metadata::new())
}

fn id(s: &str) -> Identifier {
    Identifier::from(s)
}

/// host1 owns a bridge with two ports, host2 owns an interface plugged into one of them.
fn two_origin_graph() -> Graph {
    let mut g = Graph::default();
    g.node_added(node("br0", "agent.host1")).unwrap();
    g.node_added(node("port1", "agent.host1")).unwrap();
    g.node_added(node("port2", "agent.host1")).unwrap();
    g.edge_added(edge("br0-port1", "agent.host1", "br0", "port1")).unwrap();
    g.edge_added(edge("br0-port2", "agent.host1", "br0", "port2")).unwrap();
    g.node_added(node("eth0", "agent.host2")).unwrap();
    g.edge_added(edge("port1-eth0", "agent.host2", "port1", "eth0")).unwrap();
    g
}

#[test]
fn node_added_is_idempotent_and_keeps_first_value() {
    let mut g = Graph::default();
    g.node_added(Node::new("n1", "agent.h1", meta(json!({"a": 1})))).unwrap();
    g.node_added(Node::new("n1", "agent.h1", meta(json!({"a": 99})))).unwrap();

    assert_eq!(g.node_count(), 1);
    assert_eq!(g.get_node(&id("n1")).unwrap().metadata["a"], json!(1));
    assert!(g.built_in_test().is_empty());
}

#[test]
fn entities_without_timestamps_are_stamped_on_insert() {
    let mut g = Graph::default();
    let wire: Node = serde_json::from_value(json!({"ID": "n1", "Origin": "agent.h1"})).unwrap();
    assert_eq!(wire.created_at, 0);
    g.node_added(wire).unwrap();
    g.node_added(node("n2", "agent.h1")).unwrap();
    let wire: Edge = serde_json::from_value(json!({
        "ID": "e1", "Origin": "agent.h1", "Parent": "n1", "Child": "n2"
    }))
    .unwrap();
    g.edge_added(wire).unwrap();

    let stored = g.get_node(&id("n1")).unwrap();
    assert!(stored.created_at > 0);
    assert_eq!(stored.updated_at, stored.created_at);
    assert!(g.get_edge(&id("e1")).unwrap().created_at > 0);
}

#[test]
fn node_updated_replaces_metadata() {
    let mut g = Graph::default();
    g.node_added(Node::new("n1", "agent.h1", meta(json!({"a": 1})))).unwrap();
    g.node_updated(&Node::new("n1", "agent.h1", meta(json!({"a": 2}))))
        .unwrap();

    let stored = g.get_node(&id("n1")).unwrap();
    assert_eq!(stored.metadata, meta(json!({"a": 2})));
    assert_eq!(stored.revision, 1);
    assert_eq!(g.node_count(), 1);
}

#[test]
fn updates_at_max_revision_saturate() {
    let mut g = Graph::default();
    let mut n1 = node("n1", "agent.h1");
    n1.revision = u64::MAX;
    g.node_added(n1).unwrap();
    g.node_added(node("n2", "agent.h1")).unwrap();
    let mut e = edge("n1-n2", "agent.h1", "n1", "n2");
    e.revision = u64::MAX;
    g.edge_added(e).unwrap();

    g.node_updated(&Node::new("n1", "agent.h1", meta(json!({"a": 2}))))
        .unwrap();
    g.edge_updated(&Edge::new("n1-n2", "agent.h1", "n1", "n2", meta(json!({"b": 3}))))
        .unwrap();

    let stored = g.get_node(&id("n1")).unwrap();
    assert_eq!(stored.revision, u64::MAX);
    assert_eq!(stored.metadata["a"], json!(2));
    let stored = g.get_edge(&id("n1-n2")).unwrap();
    assert_eq!(stored.revision, u64::MAX);
    assert_eq!(stored.metadata["b"], json!(3));
}

#[test]
fn update_and_delete_of_missing_entities_are_not_found() {
    let mut g = Graph::default();
    let missing_node = node("ghost", "agent.h1");
    let missing_edge = edge("ghost-edge", "agent.h1", "a", "b");

    assert!(matches!(
        g.node_updated(&missing_node),
        Err(TopologyError::NotFound(_))
    ));
    assert!(matches!(
        g.node_deleted(&missing_node),
        Err(TopologyError::NotFound(_))
    ));
    assert!(matches!(
        g.edge_updated(&missing_edge),
        Err(TopologyError::NotFound(_))
    ));
    assert!(matches!(
        g.edge_deleted(&missing_edge),
        Err(TopologyError::NotFound(_))
    ));
    assert!(g.is_empty());
}

#[test]
fn edge_requires_both_endpoints() {
    let mut g = Graph::default();
    g.node_added(node("a", "agent.h1")).unwrap();

    let err = g.edge_added(edge("a-b", "agent.h1", "a", "b")).unwrap_err();
    assert!(matches!(err, TopologyError::Conflict(_)));
    assert_eq!(g.edge_count(), 0);
}

#[test]
fn edge_added_is_idempotent() {
    let mut g = Graph::default();
    g.node_added(node("a", "agent.h1")).unwrap();
    g.node_added(node("b", "agent.h1")).unwrap();
    g.edge_added(edge("a-b", "agent.h1", "a", "b")).unwrap();
    g.edge_added(edge("a-b", "agent.h1", "a", "b")).unwrap();

    assert_eq!(g.edge_count(), 1);
    assert_eq!(g.node_edges(&id("a")).len(), 1);
    assert!(g.built_in_test().is_empty());
}

#[test]
fn edge_update_keeps_endpoints() {
    let mut g = Graph::default();
    g.node_added(node("a", "agent.h1")).unwrap();
    g.node_added(node("b", "agent.h1")).unwrap();
    g.node_added(node("c", "agent.h1")).unwrap();
    g.edge_added(edge("e", "agent.h1", "a", "b")).unwrap();

    let mut update = Edge::new("e", "agent.h1", "a", "c", meta(json!({"type": "layer2"})));
    update.revision = 7;
    g.edge_updated(&update).unwrap();

    let stored = g.get_edge(&id("e")).unwrap();
    assert_eq!(stored.child, id("b"));
    assert_eq!(stored.revision, 1);
    assert_eq!(stored.metadata["type"], json!("layer2"));
}

#[test]
fn node_deleted_cascades_to_edges() {
    let mut g = two_origin_graph();
    g.node_deleted(&node("port1", "agent.host1")).unwrap();

    assert!(g.get_node(&id("port1")).is_none());
    assert!(g.get_edge(&id("br0-port1")).is_none());
    assert!(g.get_edge(&id("port1-eth0")).is_none());
    assert!(g.get_edge(&id("br0-port2")).is_some());
    assert!(g.get_node(&id("eth0")).is_some());
    assert!(g.built_in_test().is_empty());
}

#[test]
fn del_origin_graph_removes_owned_and_dangling_entities() {
    let mut g = two_origin_graph();
    let purge = g.del_origin_graph("agent.host1").unwrap();

    assert_eq!(purge.nodes, 3);
    // Two owned edges plus host2's edge that pointed at port1
    assert_eq!(purge.edges, 3);
    assert!(g.origin_nodes("agent.host1").is_empty());
    assert!(g.origin_edges("agent.host1").is_empty());
    assert_eq!(g.origins(), vec!["agent.host2"]);
    assert!(g.get_node(&id("eth0")).is_some());
    assert!(!g.edges().any(|e| e.touches(&id("port1"))));
    for e in g.edges() {
        assert!(g.get_node(&e.parent).is_some() && g.get_node(&e.child).is_some());
    }
    assert!(g.built_in_test().is_empty());
}

#[test]
fn del_origin_graph_is_idempotent() {
    let mut g = two_origin_graph();
    g.del_origin_graph("agent.host2").unwrap();
    let second = g.del_origin_graph("agent.host2").unwrap();

    assert_eq!(second, OriginPurge::default());
    assert_eq!(g.node_count(), 3);
    assert_eq!(g.edge_count(), 2);
}

#[test]
fn del_origin_graph_bypasses_and_invalidates_cache() {
    let cached = Arc::new(CachedBackend::new(MemoryBackend::new(), 64));
    let mut g = Graph::new(cached.clone());
    g.node_added(node("n1", "agent.h1")).unwrap();
    g.node_added(node("n2", "agent.h1")).unwrap();
    g.edge_added(edge("n1-n2", "agent.h1", "n1", "n2")).unwrap();
    assert!(cached.is_cached(&id("n1")));

    g.del_origin_graph("agent.h1").unwrap();

    assert_eq!(cached.mode(), BackendMode::Cached);
    for gone in ["n1", "n2", "n1-n2"] {
        assert!(!cached.is_cached(&id(gone)));
    }
    assert!(cached.get_node(&id("n1")).unwrap().is_none());
    assert!(cached.get_edge(&id("n1-n2")).unwrap().is_none());
    assert_eq!(cached.persistent().node_count(), 0);
}

#[test]
fn backend_failure_leaves_graph_consistent() {
    let backend = Arc::new(MemoryBackend::new());
    let mut g = Graph::new(backend.clone());
    g.node_added(node("n1", "agent.h1")).unwrap();

    backend.set_available(false);
    assert!(matches!(
        g.node_added(node("n2", "agent.h1")),
        Err(TopologyError::Backend(_))
    ));
    assert!(matches!(
        g.del_origin_graph("agent.h1"),
        Err(TopologyError::Backend(_))
    ));
    assert!(g.get_node(&id("n2")).is_none());
    assert!(g.get_node(&id("n1")).is_some());

    backend.set_available(true);
    assert_eq!(g.del_origin_graph("agent.h1").unwrap().nodes, 1);
    assert!(g.is_empty());
}

#[test]
fn mutations_emit_events_in_order() {
    let (tx, mut rx) = unbounded_channel();
    let mut g = Graph::default().with_event_tx(tx);
    g.node_added(node("a", "agent.h1")).unwrap();
    g.node_added(node("b", "agent.h1")).unwrap();
    g.edge_added(edge("a-b", "agent.h1", "a", "b")).unwrap();
    g.node_added(node("a", "agent.h1")).unwrap();
    g.node_deleted(&node("a", "agent.h1")).unwrap();

    let mut seen = vec![];
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.origin(), "agent.h1");
        seen.push(event.to_string());
    }
    assert_eq!(
        seen,
        vec![
            "NodeAdded(a)",
            "NodeAdded(b)",
            "EdgeAdded(a-b)",
            "EdgeDeleted(a-b)",
            "NodeDeleted(a)",
        ]
    );
}

#[test]
fn dropped_event_receiver_does_not_fail_mutations() {
    let (tx, rx) = unbounded_channel::<GraphEvent>();
    drop(rx);
    let mut g = Graph::default().with_event_tx(tx);
    assert!(g.node_added(node("a", "agent.h1")).is_ok());
}

#[test]
fn neighbour_and_metadata_lookups() {
    let mut g = two_origin_graph();
    g.node_updated(&Node::new("eth0", "agent.host2", meta(json!({"Type": "device"}))))
        .unwrap();

    let children = g
        .lookup_children(&id("br0"))
        .into_iter()
        .map(|n| n.id.to_string())
        .collect::<Vec<_>>();
    assert_eq!(children, vec!["port1", "port2"]);

    let parents = g.lookup_parents(&id("eth0"));
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].id, id("port1"));

    let devices = g.lookup_nodes("Type", &json!("device"));
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].id, id("eth0"));
}

#[test]
fn shared_graph_serializes_writers() {
    let shared = Graph::default().into_shared();
    let handles = (0..4)
        .map(|agent| {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for i in 0..50 {
                    let mut g = shared.write();
                    let n = node(&format!("a{agent}-n{i}"), &format!("agent.h{agent}"));
                    if g.get_node(&n.id).is_none() {
                        g.node_added(n).unwrap();
                    }
                }
            })
        })
        .collect::<Vec<_>>();
    for h in handles {
        h.join().unwrap();
    }
    let g = shared.read();
    assert_eq!(g.node_count(), 200);
    assert_eq!(g.origins().len(), 4);
    assert!(g.built_in_test().is_empty());
}

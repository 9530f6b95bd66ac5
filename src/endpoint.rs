//! Agent endpoint: turns the per-connection message stream into graph mutations.
//!
//! One [AgentEndpoint] serves every agent connection. Each inbound envelope is decoded, then
//! applied under the graph's exclusive lock; the lock is released before the next message. A
//! message that fails to decode or apply is logged and dropped, never fatal to the connection or
//! to the endpoint. When an agent disconnects, everything its origin contributed is purged.

use std::sync::Arc;

use crate::{
    codec::{GraphMessage, StructMessage, SyncMsg},
    error::TopologyError,
    graph::{Graph, OriginPurge, SharedGraph},
    pool::{PeerInfo, SpeakerListener, SpeakerPool},
    properties::origin_key,
};

/// Outcome of applying one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Store operations that changed the graph or were accepted as no-ops
    pub applied: usize,
    /// Sync entries skipped because the identifier was already present
    pub skipped: usize,
    /// Every failed store operation, each already logged
    pub failures: Vec<TopologyError>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, msg_type: &str, result: Result<(), TopologyError>) {
        match result {
            Ok(()) => self.applied += 1,
            Err(e) => {
                tracing::error!("Graph: unable to apply {} message: {}", msg_type, e);
                self.failures.push(e);
            }
        }
    }
}

#[derive(Debug)]
pub struct AgentEndpoint {
    graph: SharedGraph,
}

impl AgentEndpoint {
    pub fn new(graph: SharedGraph) -> Arc<Self> {
        Arc::new(AgentEndpoint { graph })
    }

    /// Subscribe to connection events and to graph messages published under `namespace`.
    pub fn register<P: SpeakerPool + ?Sized>(self: &Arc<Self>, pool: &P, namespace: &str) {
        pool.add_event_handler(self.clone());
        pool.add_struct_message_handler(self.clone(), &[namespace]);
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// Decode and apply one envelope. A decode failure is logged and leaves the graph untouched.
    pub fn handle_envelope(&self, msg: &StructMessage) -> Result<ApplyReport, TopologyError> {
        let decoded = GraphMessage::unmarshal(msg).inspect_err(|e| {
            tracing::error!("Graph: Unable to parse the event : {}", e);
        })?;
        Ok(self.apply(decoded))
    }

    /// Apply a decoded message while holding the graph's exclusive lock.
    pub fn apply(&self, msg: GraphMessage) -> ApplyReport {
        let mut graph = self.graph.write();
        tracing::debug!("Graph: applying {}", msg);
        apply_locked(&mut graph, msg)
    }

    /// Purge the subgraph of the agent identified by `service_type` and `remote_host`.
    pub fn purge_origin(
        &self,
        service_type: &str,
        remote_host: Option<&str>,
    ) -> Result<OriginPurge, TopologyError> {
        let origin = origin_key(service_type, remote_host);
        let mut graph = self.graph.write();
        tracing::debug!("Authoritative client unregistered, delete resources {}", origin);
        graph.del_origin_graph(&origin).inspect_err(|e| {
            tracing::error!("Graph: unable to delete origin {}: {}", origin, e);
        })
    }
}

fn apply_locked(graph: &mut Graph, msg: GraphMessage) -> ApplyReport {
    let mut report = ApplyReport::default();
    let msg_type = msg.msg_type();
    match msg {
        GraphMessage::OriginGraphDeleted(origin) => {
            tracing::debug!("Got {} message for host {}", msg_type, origin);
            let result = graph.del_origin_graph(&origin).map(|_| ());
            report.record(msg_type, result);
        }
        GraphMessage::Sync(sync) | GraphMessage::SyncReply(sync) => {
            apply_sync(graph, msg_type, sync, &mut report);
        }
        GraphMessage::NodeUpdated(node) => report.record(msg_type, graph.node_updated(&node)),
        GraphMessage::NodeDeleted(node) => report.record(msg_type, graph.node_deleted(&node)),
        GraphMessage::NodeAdded(node) => report.record(msg_type, graph.node_added(node)),
        GraphMessage::EdgeUpdated(edge) => report.record(msg_type, graph.edge_updated(&edge)),
        GraphMessage::EdgeDeleted(edge) => report.record(msg_type, graph.edge_deleted(&edge)),
        GraphMessage::EdgeAdded(edge) => report.record(msg_type, graph.edge_added(edge)),
    }
    report
}

/// Nodes first so that edges between freshly synced nodes find their endpoints.
fn apply_sync(graph: &mut Graph, msg_type: &str, sync: SyncMsg, report: &mut ApplyReport) {
    for node in sync.nodes {
        if graph.get_node(&node.id).is_some() {
            report.skipped += 1;
            continue;
        }
        report.record(msg_type, graph.node_added(node));
    }
    for edge in sync.edges {
        if graph.get_edge(&edge.id).is_some() {
            report.skipped += 1;
            continue;
        }
        report.record(msg_type, graph.edge_added(edge));
    }
}

impl SpeakerListener for AgentEndpoint {
    fn on_connected(&self, peer: &PeerInfo) {
        tracing::debug!("Authoritative client registered: {}", peer);
    }

    fn on_disconnected(&self, peer: &PeerInfo) {
        // Failures are already logged; the next disconnect of this origin retries the purge.
        let _ = self.purge_origin(&peer.service_type, peer.remote_host.as_deref());
    }

    fn on_struct_message(&self, peer: &PeerInfo, msg: &StructMessage) {
        if let Ok(report) = self.handle_envelope(msg) {
            if !report.is_clean() {
                tracing::warn!(
                    "Graph: {} of {} operations from {} failed",
                    report.failures.len(),
                    report.applied + report.failures.len(),
                    peer
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::NAMESPACE,
        properties::{Edge, Identifier, Metadata, Node},
    };
    use serde_json::json;
    use test_log::test;

    fn endpoint() -> Arc<AgentEndpoint> {
        AgentEndpoint::new(Graph::default().into_shared())
    }

    fn node(id: &str) -> Node {
        Node::new(id, "agent.h1", Metadata::new())
    }

    fn sync(nodes: &[&str], edges: &[(&str, &str, &str)]) -> SyncMsg {
        SyncMsg {
            nodes: nodes.iter().map(|id| node(id)).collect(),
            edges: edges
                .iter()
                .map(|(id, p, c)| Edge::new(*id, "agent.h1", *p, *c, Metadata::new()))
                .collect(),
        }
    }

    #[test]
    fn duplicate_sync_batches_are_skipped() {
        let ep = endpoint();
        let first = ep.apply(GraphMessage::Sync(sync(&["a", "b"], &[("a-b", "a", "b")])));
        let second = ep.apply(GraphMessage::SyncReply(sync(&["a", "b"], &[("a-b", "a", "b")])));

        assert_eq!((first.applied, first.skipped), (3, 0));
        assert_eq!((second.applied, second.skipped), (0, 3));
        assert!(second.is_clean());
        assert_eq!(ep.graph().read().node_count(), 2);
    }

    #[test]
    fn every_failure_in_a_batch_is_reported() {
        let ep = endpoint();
        let report = ep.apply(GraphMessage::Sync(sync(
            &["a"],
            &[("a-x", "a", "x"), ("y-a", "y", "a")],
        )));

        assert_eq!(report.applied, 1);
        assert_eq!(report.failures.len(), 2);
        assert!(report
            .failures
            .iter()
            .all(|e| matches!(e, TopologyError::Conflict(_))));
    }

    #[test]
    fn singular_failures_do_not_block_later_messages() {
        let ep = endpoint();
        let failed = ep.apply(GraphMessage::NodeUpdated(node("ghost")));
        assert!(failed.failures[0].is_not_found());

        let ok = ep.apply(GraphMessage::NodeAdded(node("n1")));
        assert!(ok.is_clean());
        assert!(ep.graph().read().get_node(&Identifier::from("n1")).is_some());
    }

    #[test]
    fn undecodable_envelope_leaves_graph_untouched() {
        let ep = endpoint();
        ep.apply(GraphMessage::Sync(sync(&["n1", "n2"], &[("n1-n2", "n1", "n2")])));
        let snapshot = |graph: &Graph| {
            (
                graph.nodes().cloned().collect::<Vec<_>>(),
                graph.edges().cloned().collect::<Vec<_>>(),
                graph
                    .origins()
                    .into_iter()
                    .map(String::from)
                    .collect::<Vec<_>>(),
            )
        };
        let before = snapshot(&ep.graph().read());

        for bad in [
            StructMessage::new(NAMESPACE, "NodeAdded", json!({"bogus": true})),
            StructMessage::new(NAMESPACE, "EdgeDeleted", json!(["n1-n2"])),
            StructMessage::new(NAMESPACE, "Teleport", json!({})),
        ] {
            assert!(matches!(
                ep.handle_envelope(&bad),
                Err(TopologyError::Decode(_))
            ));
        }
        let after = snapshot(&ep.graph().read());
        assert_eq!(before, after);
        assert_eq!(after.1.len(), 1);
        assert_eq!(after.2, vec!["agent.h1".to_string()]);
    }

    #[test]
    fn purge_origin_uses_service_type_and_host() {
        let ep = endpoint();
        ep.apply(GraphMessage::Sync(sync(&["n1"], &[])));

        assert_eq!(ep.purge_origin("agent", None).unwrap().nodes, 0);
        assert_eq!(ep.purge_origin("agent", Some("h1")).unwrap().nodes, 1);
        assert!(ep.graph().read().is_empty());
    }
}

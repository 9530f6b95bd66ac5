use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::properties::{Edge, Node};

/// Mutations that have been applied to a [crate::graph::Graph], in application order. Emitted to
/// the graph's optional event channel so downstream subscribers can follow the shared topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GraphEvent {
    NodeAdded(Node),
    /// The stored node after the update was applied
    NodeUpdated(Node),
    NodeDeleted(Node),
    EdgeAdded(Edge),
    /// The stored edge after the update was applied
    EdgeUpdated(Edge),
    EdgeDeleted(Edge),
}

impl GraphEvent {
    /// The origin owning the entity this event is about.
    pub fn origin(&self) -> &str {
        match self {
            GraphEvent::NodeAdded(n) | GraphEvent::NodeUpdated(n) | GraphEvent::NodeDeleted(n) => {
                &n.origin
            }
            GraphEvent::EdgeAdded(e) | GraphEvent::EdgeUpdated(e) | GraphEvent::EdgeDeleted(e) => {
                &e.origin
            }
        }
    }
}

impl Display for GraphEvent {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            GraphEvent::NodeAdded(n) => write!(f, "NodeAdded({})", n.id),
            GraphEvent::NodeUpdated(n) => write!(f, "NodeUpdated({})", n.id),
            GraphEvent::NodeDeleted(n) => write!(f, "NodeDeleted({})", n.id),
            GraphEvent::EdgeAdded(e) => write!(f, "EdgeAdded({})", e.id),
            GraphEvent::EdgeUpdated(e) => write!(f, "EdgeUpdated({})", e.id),
            GraphEvent::EdgeDeleted(e) => write!(f, "EdgeDeleted({})", e.id),
        }
    }
}

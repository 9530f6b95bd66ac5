//! Graph message codec.
//!
//! Agents talk to the hub with [StructMessage] envelopes: a namespace, a message type name and a
//! JSON payload. Envelopes in the [NAMESPACE] namespace decode into the closed [GraphMessage]
//! enum; anything with an unknown type name or a payload that does not fit its type is a
//! [TopologyError::Decode].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

use crate::{
    error::TopologyError,
    properties::{Edge, Node},
};

/// Namespace graph messages are published under.
pub const NAMESPACE: &str = "Graph";

pub const SYNC_MSG_TYPE: &str = "Sync";
pub const SYNC_REPLY_MSG_TYPE: &str = "SyncReply";
pub const NODE_ADDED_MSG_TYPE: &str = "NodeAdded";
pub const NODE_UPDATED_MSG_TYPE: &str = "NodeUpdated";
pub const NODE_DELETED_MSG_TYPE: &str = "NodeDeleted";
pub const EDGE_ADDED_MSG_TYPE: &str = "EdgeAdded";
pub const EDGE_UPDATED_MSG_TYPE: &str = "EdgeUpdated";
pub const EDGE_DELETED_MSG_TYPE: &str = "EdgeDeleted";
pub const ORIGIN_GRAPH_DELETED_MSG_TYPE: &str = "OriginGraphDeleted";

/// Generic envelope delivered by the connection pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StructMessage {
    pub namespace: String,
    #[serde(rename = "Type")]
    pub msg_type: String,
    #[serde(default)]
    pub obj: Value,
}

impl StructMessage {
    pub fn new<N: Into<String>, T: Into<String>>(namespace: N, msg_type: T, obj: Value) -> Self {
        StructMessage {
            namespace: namespace.into(),
            msg_type: msg_type.into(),
            obj,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, TopologyError> {
        serde_json::from_str(text)
            .map_err(|e| TopologyError::Decode(format!("malformed envelope: {e}")))
    }

    pub fn to_json(&self) -> Result<String, TopologyError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Snapshot (or partial snapshot) of an origin's nodes and edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SyncMsg {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphMessage {
    /// Push of an agent's current state
    Sync(SyncMsg),
    /// Reply to a pull of an agent's current state
    SyncReply(SyncMsg),
    NodeAdded(Node),
    NodeUpdated(Node),
    NodeDeleted(Node),
    EdgeAdded(Edge),
    EdgeUpdated(Edge),
    EdgeDeleted(Edge),
    /// Origin whose whole subgraph must go
    OriginGraphDeleted(String),
}

fn decode<T: DeserializeOwned>(msg: &StructMessage) -> Result<T, TopologyError> {
    T::deserialize(&msg.obj)
        .map_err(|e| TopologyError::Decode(format!("invalid {} payload: {e}", msg.msg_type)))
}

impl GraphMessage {
    pub fn unmarshal(msg: &StructMessage) -> Result<GraphMessage, TopologyError> {
        let decoded = match msg.msg_type.as_str() {
            SYNC_MSG_TYPE => GraphMessage::Sync(decode(msg)?),
            SYNC_REPLY_MSG_TYPE => GraphMessage::SyncReply(decode(msg)?),
            NODE_ADDED_MSG_TYPE => GraphMessage::NodeAdded(decode(msg)?),
            NODE_UPDATED_MSG_TYPE => GraphMessage::NodeUpdated(decode(msg)?),
            NODE_DELETED_MSG_TYPE => GraphMessage::NodeDeleted(decode(msg)?),
            EDGE_ADDED_MSG_TYPE => GraphMessage::EdgeAdded(decode(msg)?),
            EDGE_UPDATED_MSG_TYPE => GraphMessage::EdgeUpdated(decode(msg)?),
            EDGE_DELETED_MSG_TYPE => GraphMessage::EdgeDeleted(decode(msg)?),
            ORIGIN_GRAPH_DELETED_MSG_TYPE => GraphMessage::OriginGraphDeleted(decode(msg)?),
            other => {
                return Err(TopologyError::Decode(format!(
                    "unknown message type '{other}'"
                )))
            }
        };
        Ok(decoded)
    }

    pub fn msg_type(&self) -> &'static str {
        match self {
            GraphMessage::Sync(_) => SYNC_MSG_TYPE,
            GraphMessage::SyncReply(_) => SYNC_REPLY_MSG_TYPE,
            GraphMessage::NodeAdded(_) => NODE_ADDED_MSG_TYPE,
            GraphMessage::NodeUpdated(_) => NODE_UPDATED_MSG_TYPE,
            GraphMessage::NodeDeleted(_) => NODE_DELETED_MSG_TYPE,
            GraphMessage::EdgeAdded(_) => EDGE_ADDED_MSG_TYPE,
            GraphMessage::EdgeUpdated(_) => EDGE_UPDATED_MSG_TYPE,
            GraphMessage::EdgeDeleted(_) => EDGE_DELETED_MSG_TYPE,
            GraphMessage::OriginGraphDeleted(_) => ORIGIN_GRAPH_DELETED_MSG_TYPE,
        }
    }

    pub fn to_struct_message(&self, namespace: &str) -> Result<StructMessage, TopologyError> {
        let obj = match self {
            GraphMessage::Sync(sync) | GraphMessage::SyncReply(sync) => {
                serde_json::to_value(sync)?
            }
            GraphMessage::NodeAdded(node)
            | GraphMessage::NodeUpdated(node)
            | GraphMessage::NodeDeleted(node) => serde_json::to_value(node)?,
            GraphMessage::EdgeAdded(edge)
            | GraphMessage::EdgeUpdated(edge)
            | GraphMessage::EdgeDeleted(edge) => serde_json::to_value(edge)?,
            GraphMessage::OriginGraphDeleted(origin) => Value::String(origin.clone()),
        };
        Ok(StructMessage::new(namespace, self.msg_type(), obj))
    }
}

impl Display for GraphMessage {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            GraphMessage::Sync(s) | GraphMessage::SyncReply(s) => write!(
                f,
                "{}({} nodes, {} edges)",
                self.msg_type(),
                s.nodes.len(),
                s.edges.len()
            ),
            GraphMessage::NodeAdded(n)
            | GraphMessage::NodeUpdated(n)
            | GraphMessage::NodeDeleted(n) => write!(f, "{}({})", self.msg_type(), n.id),
            GraphMessage::EdgeAdded(e)
            | GraphMessage::EdgeUpdated(e)
            | GraphMessage::EdgeDeleted(e) => write!(f, "{}({})", self.msg_type(), e.id),
            GraphMessage::OriginGraphDeleted(o) => write!(f, "{}({})", self.msg_type(), o),
        }
    }
}

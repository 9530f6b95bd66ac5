//! Graph entities: [Identifier], [Node], [Edge], and the [origin_key] that groups them by the
//! agent that owns them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{
    fmt::{self, Display, Formatter},
    time::{SystemTime, UNIX_EPOCH},
};

/// Free-form metadata attached to nodes and edges.
pub type Metadata = Map<String, Value>;

/// Globally unique, opaque identifier of a [Node] or an [Edge].
///
/// Agents mint their own identifiers; the hub only requires that they never collide across
/// origins.
#[derive(Clone, Debug, Default, Serialize, Deserialize, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Identifier(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(id: &str) -> Self {
        Identifier(id.to_string())
    }
}

impl From<String> for Identifier {
    fn from(id: String) -> Self {
        Identifier(id)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derive the partition key for the agent behind a connection: `"<service_type>.<host>"`, or just
/// the service type when the remote host is unknown.
pub fn origin_key(service_type: &str, remote_host: Option<&str>) -> String {
    match remote_host {
        Some(host) if !host.is_empty() => format!("{service_type}.{host}"),
        _ => service_type.to_string(),
    }
}

/// Milliseconds since the unix epoch, the unit used by node and edge timestamps.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

fn stamp(created_at: &mut i64, updated_at: &mut i64) {
    if *created_at <= 0 {
        *created_at = now_millis();
    }
    if *updated_at < *created_at {
        *updated_at = *created_at;
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Node {
    #[serde(rename = "ID")]
    pub id: Identifier,
    pub origin: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Node {
    pub fn new<I: Into<Identifier>, O: Into<String>>(id: I, origin: O, metadata: Metadata) -> Self {
        let now = now_millis();
        Node {
            id: id.into(),
            origin: origin.into(),
            metadata,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill in timestamps an agent left out.
    pub(crate) fn stamp(&mut self) {
        stamp(&mut self.created_at, &mut self.updated_at);
    }

    /// Copy the mutable part of `update` onto this node and bump its revision. Identity, origin
    /// and creation time are kept.
    pub(crate) fn absorb(&mut self, update: &Node) {
        self.metadata = update.metadata.clone();
        self.revision = self.revision.saturating_add(1);
        self.updated_at = now_millis().max(update.updated_at);
    }
}

impl Display for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Node({}, origin={}, rev={})", self.id, self.origin, self.revision)
    }
}

/// A directed parent -> child relation between two [Node]s.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Edge {
    #[serde(rename = "ID")]
    pub id: Identifier,
    pub origin: String,
    pub parent: Identifier,
    pub child: Identifier,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub revision: u64,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Edge {
    pub fn new<I, O, P, C>(id: I, origin: O, parent: P, child: C, metadata: Metadata) -> Self
    where
        I: Into<Identifier>,
        O: Into<String>,
        P: Into<Identifier>,
        C: Into<Identifier>,
    {
        let now = now_millis();
        Edge {
            id: id.into(),
            origin: origin.into(),
            parent: parent.into(),
            child: child.into(),
            metadata,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn stamp(&mut self) {
        stamp(&mut self.created_at, &mut self.updated_at);
    }

    /// Endpoints are part of an edge's identity and are never rewritten by an update.
    pub(crate) fn absorb(&mut self, update: &Edge) {
        self.metadata = update.metadata.clone();
        self.revision = self.revision.saturating_add(1);
        self.updated_at = now_millis().max(update.updated_at);
    }

    pub fn touches(&self, node: &Identifier) -> bool {
        &self.parent == node || &self.child == node
    }
}

impl Display for Edge {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Edge({}, {} -> {}, origin={}, rev={})",
            self.id, self.parent, self.child, self.origin, self.revision
        )
    }
}

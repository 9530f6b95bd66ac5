//! # topohub-core
//!
//! The synchronization core of a topology hub: one shared graph, many remote agents, each agent
//! authoritative for its own subgraph.
//!
//! ## Overview
//!
//! Agents connect to the hub, push a snapshot of the nodes and edges they own, then stream
//! incremental additions, updates and deletions. The hub folds all of it into a single shared
//! [graph::Graph]. Everything an agent contributed is tagged with its *origin*
//! (`"<service_type>.<host>"`); when the agent disconnects, its origin is purged from the graph
//! along with any edge that would otherwise be left dangling.
//!
//! ### Key Properties
//!
//! - **Idempotent ingestion**: replayed snapshots and duplicate "added" messages are no-ops
//! - **Failure isolation**: a malformed or out-of-order message is logged and dropped; the
//!   connection and every other connection keep going
//! - **Single writer**: every mutation happens under the graph's exclusive lock, one message at a
//!   time
//! - **Liveness purge**: an origin's subgraph lives exactly as long as its agent's connection
//!
//! ## Architecture
//!
//! - **[`graph`]**: the shared graph, per-origin index and cascading origin deletion
//! - **[`backend`]**: write-through persistence seam and the bypassable [backend::CachedBackend]
//! - **[`codec`]**: [codec::StructMessage] envelopes and the closed [codec::GraphMessage] enum
//! - **[`pool`]**: connection pool traits and the in-process [pool::LocalPool]
//! - **[`endpoint`]**: [endpoint::AgentEndpoint], the synchronization state machine
//! - **[`hub`]**: wiring of all of the above from a [config::HubConfig]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use topohub_core::{
//!     backend::MemoryBackend,
//!     codec::{GraphMessage, SyncMsg, NAMESPACE},
//!     config::HubConfig,
//!     hub::Hub,
//!     properties::{Metadata, Node},
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Hub::new(HubConfig::default(), MemoryBackend::new());
//!
//!     let agent = hub.connect("agent", Some("host1"));
//!     let sync = GraphMessage::Sync(SyncMsg {
//!         nodes: vec![Node::new("eth0", "agent.host1", Metadata::new())],
//!         edges: vec![],
//!     });
//!     agent.send(sync.to_struct_message(NAMESPACE)?).await?;
//!
//!     // Closing the connection purges everything "agent.host1" contributed.
//!     agent.close().await?;
//!     assert!(hub.graph().read().is_empty());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod graph;
pub mod hub;
pub mod pool;
pub mod properties;

pub use error::*;

//! Hub: wires the shared graph, its cached backend, the connection pool and the agent endpoint
//! together from a [HubConfig].

use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

use crate::{
    backend::{Backend, CacheStats, CachedBackend},
    config::HubConfig,
    endpoint::AgentEndpoint,
    event::GraphEvent,
    graph::{Graph, SharedGraph},
    pool::{Connection, LocalPool},
};

/// Point-in-time counters for a running hub.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubStats {
    pub nodes: usize,
    pub edges: usize,
    pub origins: Vec<String>,
    pub connections: usize,
    pub cache: CacheStats,
}

pub struct Hub<B> {
    config: HubConfig,
    graph: SharedGraph,
    backend: Arc<CachedBackend<B>>,
    pool: LocalPool,
    endpoint: Arc<AgentEndpoint>,
}

impl<B: Backend + 'static> Hub<B> {
    pub fn new(config: HubConfig, persistent: B) -> Self {
        Self::build(config, persistent, None)
    }

    /// Like [Hub::new], additionally streaming every applied graph mutation.
    pub fn with_events(config: HubConfig, persistent: B) -> (Self, UnboundedReceiver<GraphEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self::build(config, persistent, Some(tx)), rx)
    }

    fn build(
        config: HubConfig,
        persistent: B,
        tx: Option<tokio::sync::mpsc::UnboundedSender<GraphEvent>>,
    ) -> Self {
        let backend = Arc::new(CachedBackend::new(persistent, config.cache.capacity));
        let mut graph = Graph::new(backend.clone());
        graph.set_event_tx(tx);
        let graph = graph.into_shared();

        let pool = LocalPool::new(config.pool.queue_depth);
        let endpoint = AgentEndpoint::new(graph.clone());
        endpoint.register(&pool, &config.namespace);
        tracing::info!(
            "[Hub] agent endpoint subscribed to namespace {}",
            config.namespace
        );

        Hub {
            config,
            graph,
            backend,
            pool,
            endpoint,
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    pub fn backend(&self) -> &Arc<CachedBackend<B>> {
        &self.backend
    }

    pub fn pool(&self) -> &LocalPool {
        &self.pool
    }

    pub fn endpoint(&self) -> &Arc<AgentEndpoint> {
        &self.endpoint
    }

    /// Accept an agent connection on the hub's pool.
    pub fn connect(&self, service_type: &str, remote_host: Option<&str>) -> Connection {
        self.pool.connect(service_type, remote_host)
    }

    pub fn stats(&self) -> HubStats {
        let graph = self.graph.read();
        HubStats {
            nodes: graph.node_count(),
            edges: graph.edge_count(),
            origins: graph.origins().into_iter().map(String::from).collect(),
            connections: self.pool.connected().len(),
            cache: self.backend.stats(),
        }
    }
}

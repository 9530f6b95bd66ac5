//! Persistence seam behind the [crate::graph::Graph].
//!
//! The in-memory graph is the source of truth. Every mutation is written through a [Backend];
//! readers outside the hub core (history lookups, exporters) may query the backend instead of
//! taking the graph lock. [CachedBackend] puts a bounded read-through/write-through cache in front
//! of a persistent backend and can be switched to [BackendMode::Direct], which the graph does for
//! the duration of an origin deletion so that nothing half-deleted is served from the cache.

use parking_lot::{Mutex, RwLock};
use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::{
    error::TopologyError,
    properties::{Edge, Identifier, Node},
};

pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendMode {
    /// Reads are served from the cache when possible, writes populate it.
    #[default]
    Cached,
    /// Reads and writes go straight to the persistent backend; writes invalidate cached entries.
    Direct,
}

pub trait Backend: Send + Sync {
    fn node_added(&self, node: &Node) -> Result<(), TopologyError>;
    fn node_updated(&self, node: &Node) -> Result<(), TopologyError>;
    fn node_deleted(&self, node: &Node) -> Result<(), TopologyError>;
    fn edge_added(&self, edge: &Edge) -> Result<(), TopologyError>;
    fn edge_updated(&self, edge: &Edge) -> Result<(), TopologyError>;
    fn edge_deleted(&self, edge: &Edge) -> Result<(), TopologyError>;
    fn get_node(&self, id: &Identifier) -> Result<Option<Node>, TopologyError>;
    fn get_edge(&self, id: &Identifier) -> Result<Option<Edge>, TopologyError>;

    /// Switch the read/write mode, returning the previous one. Backends without a cache have
    /// nothing to bypass and ignore this.
    fn set_mode(&self, _mode: BackendMode) -> BackendMode {
        BackendMode::Direct
    }

    fn mode(&self) -> BackendMode {
        BackendMode::Direct
    }
}

/// Holds a backend in [BackendMode::Direct] until dropped, then restores the previous mode.
pub struct DirectGuard<'a> {
    backend: &'a dyn Backend,
    previous: BackendMode,
}

impl<'a> DirectGuard<'a> {
    pub fn enter(backend: &'a dyn Backend) -> Self {
        let previous = backend.set_mode(BackendMode::Direct);
        DirectGuard { backend, previous }
    }
}

impl Drop for DirectGuard<'_> {
    fn drop(&mut self) {
        self.backend.set_mode(self.previous);
    }
}

/// In-process persistent stand-in. Can be taken offline to exercise failure paths.
#[derive(Debug)]
pub struct MemoryBackend {
    nodes: RwLock<BTreeMap<Identifier, Node>>,
    edges: RwLock<BTreeMap<Identifier, Edge>>,
    available: AtomicBool,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        MemoryBackend {
            nodes: RwLock::new(BTreeMap::new()),
            edges: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.read().len()
    }

    fn check(&self) -> Result<(), TopologyError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TopologyError::Backend(
                "memory backend is unavailable".to_string(),
            ))
        }
    }
}

impl Backend for MemoryBackend {
    fn node_added(&self, node: &Node) -> Result<(), TopologyError> {
        self.check()?;
        self.nodes.write().insert(node.id.clone(), node.clone());
        Ok(())
    }

    fn node_updated(&self, node: &Node) -> Result<(), TopologyError> {
        self.node_added(node)
    }

    fn node_deleted(&self, node: &Node) -> Result<(), TopologyError> {
        self.check()?;
        self.nodes.write().remove(&node.id);
        Ok(())
    }

    fn edge_added(&self, edge: &Edge) -> Result<(), TopologyError> {
        self.check()?;
        self.edges.write().insert(edge.id.clone(), edge.clone());
        Ok(())
    }

    fn edge_updated(&self, edge: &Edge) -> Result<(), TopologyError> {
        self.edge_added(edge)
    }

    fn edge_deleted(&self, edge: &Edge) -> Result<(), TopologyError> {
        self.check()?;
        self.edges.write().remove(&edge.id);
        Ok(())
    }

    fn get_node(&self, id: &Identifier) -> Result<Option<Node>, TopologyError> {
        self.check()?;
        Ok(self.nodes.read().get(id).cloned())
    }

    fn get_edge(&self, id: &Identifier) -> Result<Option<Edge>, TopologyError> {
        self.check()?;
        Ok(self.edges.read().get(id).cloned())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Node(Identifier),
    Edge(Identifier),
}

#[derive(Debug)]
struct EntryCache {
    capacity: usize,
    nodes: HashMap<Identifier, Node>,
    edges: HashMap<Identifier, Edge>,
    order: VecDeque<CacheKey>,
}

impl EntryCache {
    fn new(capacity: usize) -> Self {
        EntryCache {
            capacity: capacity.max(1),
            nodes: HashMap::new(),
            edges: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn len(&self) -> usize {
        self.nodes.len() + self.edges.len()
    }

    fn put_node(&mut self, node: Node) {
        let id = node.id.clone();
        if self.nodes.insert(id.clone(), node).is_none() {
            self.order.push_back(CacheKey::Node(id));
        }
        self.evict();
    }

    fn put_edge(&mut self, edge: Edge) {
        let id = edge.id.clone();
        if self.edges.insert(id.clone(), edge).is_none() {
            self.order.push_back(CacheKey::Edge(id));
        }
        self.evict();
    }

    fn invalidate(&mut self, key: &CacheKey) {
        match key {
            CacheKey::Node(id) => {
                self.nodes.remove(id);
            }
            CacheKey::Edge(id) => {
                self.edges.remove(id);
            }
        }
        self.order.retain(|k| k != key);
    }

    fn evict(&mut self) {
        while self.len() > self.capacity {
            match self.order.pop_front() {
                Some(CacheKey::Node(id)) => {
                    self.nodes.remove(&id);
                }
                Some(CacheKey::Edge(id)) => {
                    self.edges.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub cached_nodes: usize,
    pub cached_edges: usize,
}

#[derive(Debug)]
pub struct CachedBackend<B> {
    persistent: B,
    cache: Mutex<EntryCache>,
    mode: RwLock<BackendMode>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<B: Backend> CachedBackend<B> {
    pub fn new(persistent: B, capacity: usize) -> Self {
        CachedBackend {
            persistent,
            cache: Mutex::new(EntryCache::new(capacity)),
            mode: RwLock::new(BackendMode::Cached),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn persistent(&self) -> &B {
        &self.persistent
    }

    /// Enter [BackendMode::Direct] for as long as the returned guard lives.
    pub fn direct(&self) -> DirectGuard<'_> {
        DirectGuard::enter(self)
    }

    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            cached_nodes: cache.nodes.len(),
            cached_edges: cache.edges.len(),
        }
    }

    pub fn is_cached(&self, id: &Identifier) -> bool {
        let cache = self.cache.lock();
        cache.nodes.contains_key(id) || cache.edges.contains_key(id)
    }

    fn is_direct(&self) -> bool {
        *self.mode.read() == BackendMode::Direct
    }
}

impl<B: Backend> Backend for CachedBackend<B> {
    fn node_added(&self, node: &Node) -> Result<(), TopologyError> {
        self.persistent.node_added(node)?;
        if self.is_direct() {
            self.cache.lock().invalidate(&CacheKey::Node(node.id.clone()));
        } else {
            self.cache.lock().put_node(node.clone());
        }
        Ok(())
    }

    fn node_updated(&self, node: &Node) -> Result<(), TopologyError> {
        self.persistent.node_updated(node)?;
        if self.is_direct() {
            self.cache.lock().invalidate(&CacheKey::Node(node.id.clone()));
        } else {
            self.cache.lock().put_node(node.clone());
        }
        Ok(())
    }

    fn node_deleted(&self, node: &Node) -> Result<(), TopologyError> {
        self.persistent.node_deleted(node)?;
        self.cache.lock().invalidate(&CacheKey::Node(node.id.clone()));
        Ok(())
    }

    fn edge_added(&self, edge: &Edge) -> Result<(), TopologyError> {
        self.persistent.edge_added(edge)?;
        if self.is_direct() {
            self.cache.lock().invalidate(&CacheKey::Edge(edge.id.clone()));
        } else {
            self.cache.lock().put_edge(edge.clone());
        }
        Ok(())
    }

    fn edge_updated(&self, edge: &Edge) -> Result<(), TopologyError> {
        self.persistent.edge_updated(edge)?;
        if self.is_direct() {
            self.cache.lock().invalidate(&CacheKey::Edge(edge.id.clone()));
        } else {
            self.cache.lock().put_edge(edge.clone());
        }
        Ok(())
    }

    fn edge_deleted(&self, edge: &Edge) -> Result<(), TopologyError> {
        self.persistent.edge_deleted(edge)?;
        self.cache.lock().invalidate(&CacheKey::Edge(edge.id.clone()));
        Ok(())
    }

    fn get_node(&self, id: &Identifier) -> Result<Option<Node>, TopologyError> {
        if self.is_direct() {
            return self.persistent.get_node(id);
        }
        if let Some(node) = self.cache.lock().nodes.get(id).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(node));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let found = self.persistent.get_node(id)?;
        if let Some(ref node) = found {
            self.cache.lock().put_node(node.clone());
        }
        Ok(found)
    }

    fn get_edge(&self, id: &Identifier) -> Result<Option<Edge>, TopologyError> {
        if self.is_direct() {
            return self.persistent.get_edge(id);
        }
        if let Some(edge) = self.cache.lock().edges.get(id).cloned() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(edge));
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let found = self.persistent.get_edge(id)?;
        if let Some(ref edge) = found {
            self.cache.lock().put_edge(edge.clone());
        }
        Ok(found)
    }

    fn set_mode(&self, mode: BackendMode) -> BackendMode {
        let mut current = self.mode.write();
        let previous = *current;
        if previous != mode {
            tracing::debug!("[CachedBackend] mode {:?} -> {:?}", previous, mode);
        }
        *current = mode;
        previous
    }

    fn mode(&self) -> BackendMode {
        *self.mode.read()
    }
}

//! Local durable cache for resource metadata and content.
//!
//! The cache keeps two logical stores keyed by resource path: `nodes` holds
//! the JSON-encoded [`Node`] for a path and `files` holds its raw content. A
//! third namespace, `session`, holds the connection credentials.
//!
//! Storage is delegated to a [`CacheStore`] backend. [`SqliteStore`] is the
//! durable backend; [`MemoryStore`] is used by tests and short-lived tools.
//! [`LocalCache::set`] writes the node and the content in one atomic backend
//! operation, so a crash never leaves the two out of step.

pub mod memory;
pub mod schema;
pub mod sqlite;

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::errors::CacheError;
use crate::models::{Node, PathStatus};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ---------------------------------------------------------------------------
// Backend abstraction
// ---------------------------------------------------------------------------

/// A key space inside a [`CacheStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Nodes,
    Files,
    Session,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nodes => "nodes",
            Self::Files => "files",
            Self::Session => "session",
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A namespaced string key-value store.
///
/// Implementations must be safe to share between independent resources and
/// must apply [`put_all`](Self::put_all) atomically.
pub trait CacheStore: Send + Sync {
    /// Read one value.
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<String>, CacheError>;

    /// Write several values as one unit: either all land or none do.
    fn put_all(&self, entries: &[(Namespace, &str, &str)]) -> Result<(), CacheError>;

    /// Write a single value.
    fn put(&self, ns: Namespace, key: &str, value: &str) -> Result<(), CacheError> {
        self.put_all(&[(ns, key, value)])
    }

    /// List every key in a namespace, sorted.
    fn keys(&self, ns: Namespace) -> Result<Vec<String>, CacheError>;

    /// Remove every key in the given namespaces.
    fn clear(&self, namespaces: &[Namespace]) -> Result<(), CacheError>;
}

// ---------------------------------------------------------------------------
// LocalCache
// ---------------------------------------------------------------------------

/// The local record store used by the sync engine.
///
/// Cheap to clone; clones share the same backend.
#[derive(Clone)]
pub struct LocalCache {
    store: Arc<dyn CacheStore>,
}

impl LocalCache {
    /// Wrap an existing backend.
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// A cache that lives only as long as the process.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Open (or create) a durable cache backed by the SQLite file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let store = SqliteStore::new(path)?;
        store.initialize()?;
        Ok(Self::new(Arc::new(store)))
    }

    /// The backend, for components that keep their own namespace.
    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Read the node for `path`.
    ///
    /// A record that no longer parses is reported as absent; the next
    /// confirmed GET or PUT replaces it.
    pub fn get_node(&self, path: &str) -> Result<Option<Node>, CacheError> {
        let Some(raw) = self.store.get(Namespace::Nodes, path)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Node>(&raw) {
            Ok(node) => Ok(Some(node)),
            Err(e) => {
                warn!(path, error = %e, "ignoring malformed cached node");
                Ok(None)
            }
        }
    }

    /// Replace the node for `path`.
    pub fn set_node(&self, path: &str, node: &Node) -> Result<(), CacheError> {
        let raw = encode_node(path, node)?;
        self.store.put(Namespace::Nodes, path, &raw)?;
        debug!(path, version = ?node.version, pending = node.is_pending(), "stored node");
        Ok(())
    }

    /// Read the cached content for `path`.
    pub fn get_file(&self, path: &str) -> Result<Option<String>, CacheError> {
        self.store.get(Namespace::Files, path)
    }

    /// Replace the cached content for `path`.
    pub fn set_file(&self, path: &str, content: &str) -> Result<(), CacheError> {
        self.store.put(Namespace::Files, path, content)
    }

    /// Read node and content together.
    pub fn get(&self, path: &str) -> Result<(Option<Node>, Option<String>), CacheError> {
        let node = self.get_node(path)?;
        let file = self.get_file(path)?;
        Ok((node, file))
    }

    /// Write node and content together, atomically.
    pub fn set(&self, path: &str, node: &Node, content: &str) -> Result<(), CacheError> {
        let raw = encode_node(path, node)?;
        self.store.put_all(&[
            (Namespace::Nodes, path, raw.as_str()),
            (Namespace::Files, path, content),
        ])?;
        debug!(path, version = ?node.version, pending = node.is_pending(), "stored record");
        Ok(())
    }

    /// Every path with a cached node.
    pub fn paths(&self) -> Result<Vec<String>, CacheError> {
        self.store.keys(Namespace::Nodes)
    }

    /// Summarise the cached state of `path`, if anything is cached.
    pub fn status(&self, path: &str) -> Result<Option<PathStatus>, CacheError> {
        let (node, file) = self.get(path)?;
        Ok(node.map(|node| PathStatus {
            path: path.to_string(),
            pending: node.is_pending(),
            version: node.version,
            content_type: node.content_type,
            content_bytes: file.map(|f| f.len()).unwrap_or(0),
        }))
    }

    /// Forget every cached node and file.
    pub fn clear(&self) -> Result<(), CacheError> {
        info!("clearing local cache");
        self.store.clear(&[Namespace::Nodes, Namespace::Files])
    }
}

fn encode_node(path: &str, node: &Node) -> Result<String, CacheError> {
    serde_json::to_string(node).map_err(|e| CacheError::Encode {
        key: path.to_string(),
        detail: e.to_string(),
    })
}

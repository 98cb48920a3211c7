//! Conflict resolution contract.
//!
//! A conflict exists when the local record carries an unconfirmed edit while
//! the server has moved on to a different version. The sync engine hands
//! both sides to a [`ConflictResolver`] exactly once per detected conflict
//! and persists only what the resolver returns.
//!
//! Merge policy is not the engine's concern. This module ships a few
//! ready-made policies:
//! 1. [`KeepLocal`] / [`TakeRemote`] -- pick one side wholesale.
//! 2. [`UnionByKey`] -- merge JSON arrays of entries by a business key.

pub mod strategy;
pub mod union;

use async_trait::async_trait;

use crate::cache::LocalCache;
use crate::errors::ConflictError;
use crate::models::Node;
use crate::remote::RemoteContent;

pub use strategy::{KeepLocal, TakeRemote};
pub use union::UnionByKey;

/// The local half of a conflict.
///
/// Content is only read from the cache if the resolver asks for it.
pub struct LocalSide<'a> {
    path: &'a str,
    node: Node,
    cache: &'a LocalCache,
}

impl<'a> LocalSide<'a> {
    pub(crate) fn new(path: &'a str, node: Node, cache: &'a LocalCache) -> Self {
        Self { path, node, cache }
    }

    pub fn path(&self) -> &str {
        self.path
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Load the pending local content.
    pub fn content(&self) -> Result<String, ConflictError> {
        self.cache
            .get_file(self.path)?
            .ok_or_else(|| ConflictError::MissingLocalContent(self.path.to_string()))
    }
}

/// The remote half of a conflict. Its content can be read once.
#[derive(Debug)]
pub struct RemoteSide {
    node: Node,
    content: RemoteContent,
}

impl RemoteSide {
    pub(crate) fn new(node: Node, content: RemoteContent) -> Self {
        Self { node, content }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Consume the side and read the remote content.
    pub async fn content(self) -> Result<String, ConflictError> {
        Ok(self.content.text().await?)
    }
}

/// The value a resolver settles on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub content: String,
    pub content_type: String,
}

impl Resolution {
    pub fn new(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
        }
    }
}

/// Merges divergent local and remote states into one value.
#[async_trait]
pub trait ConflictResolver: Send + Sync {
    async fn resolve(
        &self,
        local: LocalSide<'_>,
        remote: RemoteSide,
    ) -> Result<Resolution, ConflictError>;
}

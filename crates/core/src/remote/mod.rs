//! Contract for the versioned remote store.
//!
//! The sync engine only ever talks to the server through [`RemoteClient`]:
//! a conditional GET that may report "unchanged", and a conditional PUT that
//! may report a stale precondition. [`HttpRemote`] speaks the protocol over
//! HTTP; [`FakeRemote`] is an in-memory store for tests and offline demos.

pub mod fake;
pub mod http;

use async_trait::async_trait;

use crate::errors::RemoteError;
use crate::models::Node;

pub use fake::FakeRemote;
pub use http::HttpRemote;

/// Concurrency precondition carried by a PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Write unconditionally.
    None,
    /// Write only if the server still holds this version (`If-Match`).
    IfMatch(String),
    /// Write only if nothing exists yet (`If-None-Match: *`).
    IfAbsent,
}

impl Precondition {
    /// The precondition for overwriting a resource last seen at `version`.
    ///
    /// Without a known version the write may only create the resource.
    pub fn for_version(version: Option<&str>) -> Self {
        match version {
            Some(v) => Self::IfMatch(v.to_string()),
            None => Self::IfAbsent,
        }
    }
}

/// Body of a fetched revision, readable exactly once.
pub struct RemoteContent {
    inner: ContentInner,
}

enum ContentInner {
    Ready(String),
    Response(reqwest::Response),
}

impl RemoteContent {
    /// Content that is already in memory.
    pub fn ready(content: impl Into<String>) -> Self {
        Self {
            inner: ContentInner::Ready(content.into()),
        }
    }

    pub(crate) fn from_response(response: reqwest::Response) -> Self {
        Self {
            inner: ContentInner::Response(response),
        }
    }

    /// Consume the handle and read the body as text.
    pub async fn text(self) -> Result<String, RemoteError> {
        match self.inner {
            ContentInner::Ready(content) => Ok(content),
            ContentInner::Response(response) => Ok(response.text().await?),
        }
    }
}

impl std::fmt::Debug for RemoteContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            ContentInner::Ready(c) => write!(f, "RemoteContent::Ready({} bytes)", c.len()),
            ContentInner::Response(_) => write!(f, "RemoteContent::Response"),
        }
    }
}

/// Result of a conditional GET.
#[derive(Debug)]
pub enum GetOutcome {
    /// The server's version equals the one supplied (304).
    Unchanged,
    /// Nothing is stored at this path (404).
    NotFound,
    /// A different revision exists.
    Fetched { node: Node, content: RemoteContent },
}

/// Result of a conditional PUT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PutOutcome {
    /// The write was accepted; the node carries the new version.
    Stored(Node),
    /// The precondition no longer matches the server (412).
    Conflict,
}

/// A versioned store reachable over the network.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Fetch `path` unless the server still holds `if_none_match`.
    async fn get(&self, path: &str, if_none_match: Option<&str>)
        -> Result<GetOutcome, RemoteError>;

    /// Store `content` at `path` if `precondition` still holds.
    async fn put(
        &self,
        path: &str,
        content: &str,
        content_type: &str,
        precondition: Precondition,
    ) -> Result<PutOutcome, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_for_version() {
        assert_eq!(
            Precondition::for_version(Some("v3")),
            Precondition::IfMatch("v3".into())
        );
        assert_eq!(Precondition::for_version(None), Precondition::IfAbsent);
    }

    #[tokio::test]
    async fn test_ready_content_reads_once() {
        let content = RemoteContent::ready("[1,2]");
        assert_eq!(format!("{:?}", content), "RemoteContent::Ready(5 bytes)");
        assert_eq!(content.text().await.unwrap(), "[1,2]");
    }
}

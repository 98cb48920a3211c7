//! Domain model types shared by the cache, the remote client, and the sync
//! engine.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Metadata describing one revision of a resource.
///
/// Persisted as `{"version": "...", "type": "...", "sync": false}`. `version`
/// is absent until the server has confirmed a revision; `sync` is only ever
/// written as `false` (unconfirmed local edit) and omitted otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(rename = "type")]
    pub content_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<bool>,
}

impl Node {
    /// A node confirmed by the server at `version`.
    pub fn confirmed(version: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            content_type: content_type.into(),
            sync: None,
        }
    }

    /// A node for a local edit that has not been acknowledged yet.
    ///
    /// Keeps the last known version so the next push can use it as its
    /// precondition.
    pub fn unconfirmed(version: Option<String>, content_type: impl Into<String>) -> Self {
        Self {
            version,
            content_type: content_type.into(),
            sync: Some(false),
        }
    }

    /// Whether this node carries an edit the server has not confirmed.
    ///
    /// Only an explicit `sync: false` counts; a missing flag means confirmed.
    pub fn is_pending(&self) -> bool {
        self.sync == Some(false)
    }
}

// ---------------------------------------------------------------------------
// Resource state
// ---------------------------------------------------------------------------

/// Observable state of a [`SyncResource`](crate::resource::SyncResource).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Unsubscribed,
    Idle,
    Busy,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unsubscribed => write!(f, "unsubscribed"),
            Self::Idle => write!(f, "idle"),
            Self::Busy => write!(f, "busy"),
        }
    }
}

// ---------------------------------------------------------------------------
// Cycle outcome
// ---------------------------------------------------------------------------

/// What a single poll or update cycle did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// The remote version matched the local one.
    Unchanged,
    /// Nothing exists on the server for this path.
    NotFound,
    /// A new remote revision was stored locally.
    Fetched,
    /// A pending local edit was confirmed by the server.
    Pushed,
    /// A pending local edit could not be pushed; it stays pending.
    PushFailed,
    /// A conflict was resolved and the result stored locally.
    Resolved,
    /// The cycle failed with a transport or cache error.
    Failed,
    /// The subscription changed while the cycle was in flight.
    Discarded,
}

impl std::fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::NotFound => write!(f, "not_found"),
            Self::Fetched => write!(f, "fetched"),
            Self::Pushed => write!(f, "pushed"),
            Self::PushFailed => write!(f, "push_failed"),
            Self::Resolved => write!(f, "resolved"),
            Self::Failed => write!(f, "failed"),
            Self::Discarded => write!(f, "discarded"),
        }
    }
}

// ---------------------------------------------------------------------------
// Status summary
// ---------------------------------------------------------------------------

/// Local view of one cached path, as shown by `resync status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathStatus {
    pub path: String,
    pub version: Option<String>,
    pub content_type: String,
    pub pending: bool,
    pub content_bytes: usize,
}

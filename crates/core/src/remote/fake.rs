//! In-memory versioned store implementing [`RemoteClient`].
//!
//! Behaves like a well-behaved server: every accepted write gets a fresh
//! version, stale preconditions are rejected, and unchanged GETs are
//! reported as such. It can also be taken offline, and responses can be held
//! back to observe operations while they are in flight.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::debug;

use super::{GetOutcome, Precondition, PutOutcome, RemoteClient, RemoteContent};
use crate::errors::RemoteError;
use crate::models::Node;

#[derive(Debug, Clone)]
struct Record {
    version: String,
    content_type: String,
    content: String,
}

/// A request seen by the fake, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Get {
        path: String,
        if_none_match: Option<String>,
    },
    Put {
        path: String,
        content: String,
        precondition: Precondition,
    },
}

/// In-memory remote store.
pub struct FakeRemote {
    records: Mutex<HashMap<String, Record>>,
    requests: Mutex<Vec<Request>>,
    next_version: AtomicU64,
    offline: AtomicBool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    hold: watch::Sender<bool>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRemote {
    pub fn new() -> Self {
        let (hold, _) = watch::channel(false);
        Self {
            records: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            next_version: AtomicU64::new(1),
            offline: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            hold,
        }
    }

    /// Make every request fail with a transport error until brought back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Keep requests waiting after they arrive until [`release`](Self::release).
    pub fn hold(&self) {
        self.hold.send_replace(true);
    }

    /// Let held requests complete.
    pub fn release(&self) {
        self.hold.send_replace(false);
    }

    /// Write directly to the store, as another device would.
    ///
    /// Returns the new version.
    pub fn write(&self, path: &str, content: &str, content_type: &str) -> String {
        let version = self.mint_version();
        self.records().insert(
            path.to_string(),
            Record {
                version: version.clone(),
                content_type: content_type.to_string(),
                content: content.to_string(),
            },
        );
        version
    }

    /// Current content at `path`.
    pub fn content(&self, path: &str) -> Option<String> {
        self.records().get(path).map(|r| r.content.clone())
    }

    /// Current version at `path`.
    pub fn version(&self, path: &str) -> Option<String> {
        self.records().get(path).map(|r| r.version.clone())
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.requests).clone()
    }

    /// Number of GETs received.
    pub fn get_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| matches!(r, Request::Get { .. }))
            .count()
    }

    /// Number of PUTs received.
    pub fn put_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| matches!(r, Request::Put { .. }))
            .count()
    }

    /// Requests currently being served.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest number of requests ever served at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, Record>> {
        lock(&self.records)
    }

    fn mint_version(&self) -> String {
        format!("v{}", self.next_version.fetch_add(1, Ordering::SeqCst))
    }

    async fn enter(&self, request: Request) -> Result<InFlight<'_>, RemoteError> {
        lock(&self.requests).push(request);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let mut rx = self.hold.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|held| !*held).await;

        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Unreachable("fake remote is offline".into()));
        }
        Ok(guard)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl RemoteClient for FakeRemote {
    async fn get(
        &self,
        path: &str,
        if_none_match: Option<&str>,
    ) -> Result<GetOutcome, RemoteError> {
        let _guard = self
            .enter(Request::Get {
                path: path.to_string(),
                if_none_match: if_none_match.map(str::to_string),
            })
            .await?;

        let record = self.records().get(path).cloned();
        let outcome = match record {
            None => GetOutcome::NotFound,
            Some(r) if Some(r.version.as_str()) == if_none_match => GetOutcome::Unchanged,
            Some(r) => GetOutcome::Fetched {
                node: Node::confirmed(r.version, r.content_type),
                content: RemoteContent::ready(r.content),
            },
        };
        debug!(path, ?outcome, "fake get");
        Ok(outcome)
    }

    async fn put(
        &self,
        path: &str,
        content: &str,
        content_type: &str,
        precondition: Precondition,
    ) -> Result<PutOutcome, RemoteError> {
        let _guard = self
            .enter(Request::Put {
                path: path.to_string(),
                content: content.to_string(),
                precondition: precondition.clone(),
            })
            .await?;

        let mut records = self.records();
        let current = records.get(path).map(|r| r.version.clone());
        let accepted = match (&precondition, current.as_deref()) {
            (Precondition::None, _) => true,
            (Precondition::IfMatch(expected), Some(actual)) => expected == actual,
            (Precondition::IfMatch(_), None) => false,
            (Precondition::IfAbsent, current) => current.is_none(),
        };
        if !accepted {
            debug!(path, ?precondition, current = ?current, "fake put rejected");
            return Ok(PutOutcome::Conflict);
        }

        let version = self.mint_version();
        records.insert(
            path.to_string(),
            Record {
                version: version.clone(),
                content_type: content_type.to_string(),
                content: content.to_string(),
            },
        );
        debug!(path, version = %version, "fake put stored");
        Ok(PutOutcome::Stored(Node::confirmed(version, content_type)))
    }
}

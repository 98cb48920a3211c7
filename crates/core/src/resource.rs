//! The sync engine for a single resource.
//!
//! A [`SyncResource`] keeps one path consistent between the [`LocalCache`]
//! and a [`RemoteClient`]. Each cycle decides the sync direction from the
//! local node:
//!
//! 1. Confirmed (or absent) local node: conditional GET, store whatever is
//!    new and notify.
//! 2. Unconfirmed local edit (`sync: false`): push it first with a
//!    conditional PUT. A stale precondition is a conflict, which fetches the
//!    remote side once and hands both sides to the [`ConflictResolver`].
//!
//! Cycles never overlap for one resource. Transport failures are logged and
//! retried on the next scheduled poll; the schedule itself keeps running
//! until [`SyncResource::unsubscribe`]. Completions of work started before an
//! unsubscribe are discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::LocalCache;
use crate::conflict::{ConflictResolver, KeepLocal, LocalSide, RemoteSide};
use crate::errors::{CacheError, RemoteError};
use crate::models::{CycleOutcome, Node, ResourceState};
use crate::remote::{GetOutcome, Precondition, PutOutcome, RemoteClient, RemoteContent};
use crate::scheduler::Wakeup;

/// Poll interval used when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Change notification: `(content, node)` for the path.
pub type ChangeCallback = Arc<dyn Fn(&str, &Node) + Send + Sync>;

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Configures a [`SyncResource`] before it starts syncing.
pub struct SyncResourceBuilder {
    path: String,
    remote: Arc<dyn RemoteClient>,
    cache: LocalCache,
    interval: Duration,
    on_change: Option<ChangeCallback>,
    resolver: Arc<dyn ConflictResolver>,
}

impl SyncResourceBuilder {
    /// Time between polls while subscribed.
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Called with the new content and node whenever the local value changes
    /// because of the remote, or when subscribing finds a cached value.
    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &Node) + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(callback));
        self
    }

    /// Merge policy for conflicting edits. Defaults to [`KeepLocal`].
    pub fn resolver<R>(mut self, resolver: R) -> Self
    where
        R: ConflictResolver + 'static,
    {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Like [`resolver`](Self::resolver), for a shared policy.
    pub fn shared_resolver(mut self, resolver: Arc<dyn ConflictResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn build(self) -> SyncResource {
        SyncResource {
            inner: Arc::new(Inner {
                path: self.path,
                remote: self.remote,
                cache: self.cache,
                interval: self.interval,
                on_change: self.on_change,
                resolver: self.resolver,
                subscribed: AtomicBool::new(false),
                busy: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                cycle: tokio::sync::Mutex::new(()),
                record: Mutex::new(()),
                wakeup: Wakeup::new(),
                watchers: Mutex::new(Vec::new()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// SyncResource
// ---------------------------------------------------------------------------

/// Handle to one synchronized path.
///
/// Cheap to clone; clones drive the same resource. Polling stops when the
/// resource is unsubscribed or every handle has been dropped.
#[derive(Clone)]
pub struct SyncResource {
    inner: Arc<Inner>,
}

struct Inner {
    path: String,
    remote: Arc<dyn RemoteClient>,
    cache: LocalCache,
    interval: Duration,
    on_change: Option<ChangeCallback>,
    resolver: Arc<dyn ConflictResolver>,
    subscribed: AtomicBool,
    busy: AtomicBool,
    /// Bumped on unsubscribe. A cycle only commits results if the epoch it
    /// started in is still current.
    epoch: AtomicU64,
    /// Held for the whole of a poll or update cycle.
    cycle: tokio::sync::Mutex<()>,
    /// Held across local read-check-write sequences, never across an await.
    record: Mutex<()>,
    wakeup: Wakeup,
    watchers: Mutex<Vec<mpsc::UnboundedSender<(String, Node)>>>,
}

impl SyncResource {
    /// Start configuring a resource for `path`.
    pub fn builder(
        path: impl Into<String>,
        remote: Arc<dyn RemoteClient>,
        cache: LocalCache,
    ) -> SyncResourceBuilder {
        SyncResourceBuilder {
            path: path.into(),
            remote,
            cache,
            interval: DEFAULT_POLL_INTERVAL,
            on_change: None,
            resolver: Arc::new(KeepLocal),
        }
    }

    /// A resource with default settings.
    pub fn new(path: impl Into<String>, remote: Arc<dyn RemoteClient>, cache: LocalCache) -> Self {
        Self::builder(path, remote, cache).build()
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscribed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ResourceState {
        if !self.is_subscribed() {
            ResourceState::Unsubscribed
        } else if self.inner.busy.load(Ordering::SeqCst) {
            ResourceState::Busy
        } else {
            ResourceState::Idle
        }
    }

    /// Whether a poll is scheduled.
    pub fn is_scheduled(&self) -> bool {
        self.inner.wakeup.is_armed()
    }

    /// Stream of change events, in addition to the `on_change` callback.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<(String, Node)> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.watchers).push(tx);
        rx
    }

    /// Start syncing.
    ///
    /// Emits the cached value (if any) before touching the network, then runs
    /// the first poll. Returns `None` if the resource was already subscribed.
    pub async fn subscribe(&self) -> Option<CycleOutcome> {
        // Read before flipping the flag so a racing unsubscribe discards the
        // first poll.
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        if self.inner.subscribed.swap(true, Ordering::SeqCst) {
            debug!(path = %self.inner.path, "already subscribed");
            return None;
        }
        info!(path = %self.inner.path, interval_ms = self.inner.interval.as_millis() as u64, "subscribed");

        match self.inner.cache.get(&self.inner.path) {
            Ok((Some(node), Some(content))) => self.inner.notify(&content, &node),
            Ok(_) => {}
            Err(e) => warn!(path = %self.inner.path, error = %e, "failed to read cached value"),
        }

        Some(self.poll_in(epoch).await)
    }

    /// Stop syncing. Safe to call at any time, including mid-cycle.
    pub fn unsubscribe(&self) {
        self.inner.wakeup.cancel();
        if self.inner.subscribed.swap(false, Ordering::SeqCst) {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            info!(path = %self.inner.path, "unsubscribed");
        }
    }

    /// Run one reconciliation cycle now, then schedule the next if subscribed.
    ///
    /// Works on an unsubscribed resource too, as a one-shot sync (this is
    /// what `resync get` does). Scheduled polls never run once unsubscribed.
    pub async fn poll(&self) -> CycleOutcome {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        self.poll_in(epoch).await
    }

    #[instrument(skip(self), fields(path = %self.inner.path))]
    async fn poll_in(&self, epoch: u64) -> CycleOutcome {
        let outcome = {
            let _cycle = self.inner.cycle.lock().await;
            let _busy = Busy::enter(&self.inner.busy);
            if !self.inner.is_current(epoch) {
                CycleOutcome::Discarded
            } else {
                self.inner
                    .poll_cycle(epoch)
                    .await
                    .unwrap_or_else(|e| self.inner.cycle_failed(e))
            }
        };
        debug!(%outcome, "poll finished");
        self.reschedule(epoch);
        outcome
    }

    /// Replace the value locally and push it.
    ///
    /// The local write is committed before any network activity and stays
    /// unconfirmed until the server accepts it. Only a local cache failure is
    /// returned as an error; push failures are retried by later polls.
    #[instrument(skip(self, content), fields(path = %self.inner.path, bytes = content.len()))]
    pub async fn update(&self, content: &str, content_type: &str) -> Result<CycleOutcome, CacheError> {
        self.inner.wakeup.cancel();
        let epoch = self.inner.epoch.load(Ordering::SeqCst);

        if let Err(e) = self.inner.write_pending(content, content_type) {
            error!(path = %self.inner.path, error = %e, "failed to store local edit");
            self.reschedule(epoch);
            return Err(e);
        }

        let outcome = {
            let _cycle = self.inner.cycle.lock().await;
            let _busy = Busy::enter(&self.inner.busy);
            if !self.inner.is_current(epoch) {
                CycleOutcome::Discarded
            } else {
                self.inner
                    .push_pending(epoch)
                    .await
                    .unwrap_or_else(|e| self.inner.cycle_failed(e))
            }
        };
        debug!(%outcome, "update finished");
        self.reschedule(epoch);
        Ok(outcome)
    }

    fn reschedule(&self, epoch: u64) {
        if !self.is_subscribed() || !self.inner.is_current(epoch) {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.wakeup.arm(self.inner.interval, async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let resource = SyncResource { inner };
            // The timer may have fired just before an unsubscribe.
            if resource.is_subscribed() && resource.inner.is_current(epoch) {
                resource.poll_in(epoch).await;
            }
        });
    }
}

impl std::fmt::Debug for SyncResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncResource")
            .field("path", &self.inner.path)
            .field("interval", &self.inner.interval)
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Cycle internals
// ---------------------------------------------------------------------------

impl Inner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn write_pending(&self, content: &str, content_type: &str) -> Result<(), CacheError> {
        let _record = lock(&self.record);
        let version = self.cache.get_node(&self.path)?.and_then(|n| n.version);
        let node = Node::unconfirmed(version, content_type);
        self.cache.set(&self.path, &node, content)
    }

    fn notify(&self, content: &str, node: &Node) {
        if let Some(callback) = &self.on_change {
            callback(content, node);
        }
        lock(&self.watchers).retain(|tx| tx.send((content.to_string(), node.clone())).is_ok());
    }

    fn cycle_failed(&self, e: CacheError) -> CycleOutcome {
        error!(path = %self.path, error = %e, "sync cycle failed");
        CycleOutcome::Failed
    }

    fn transport_failed(&self, op: &str, e: &RemoteError) {
        match e {
            RemoteError::Unauthorized { status } => {
                error!(path = %self.path, op, status, "remote rejected credentials")
            }
            _ => warn!(path = %self.path, op, error = %e, "remote request failed; will retry"),
        }
    }

    async fn poll_cycle(&self, epoch: u64) -> Result<CycleOutcome, CacheError> {
        let local = self.cache.get_node(&self.path)?;
        if local.as_ref().is_some_and(Node::is_pending) {
            return self.push_pending(epoch).await;
        }

        let known = local.and_then(|n| n.version);
        let (node, content) = match self.remote.get(&self.path, known.as_deref()).await {
            Ok(GetOutcome::Unchanged) => return Ok(CycleOutcome::Unchanged),
            Ok(GetOutcome::NotFound) => return Ok(CycleOutcome::NotFound),
            Ok(GetOutcome::Fetched { node, content }) => (node, content),
            Err(e) => {
                self.transport_failed("get", &e);
                return Ok(CycleOutcome::Failed);
            }
        };
        let content = match content.text().await {
            Ok(c) => c,
            Err(e) => {
                self.transport_failed("get", &e);
                return Ok(CycleOutcome::Failed);
            }
        };

        // An edit may have landed while the GET was in flight.
        let pending = {
            let _record = lock(&self.record);
            if !self.is_current(epoch) {
                return Ok(CycleOutcome::Discarded);
            }
            match self.cache.get_node(&self.path)? {
                Some(local) if local.is_pending() => Some(local),
                _ => {
                    self.cache.set(&self.path, &node, &content)?;
                    None
                }
            }
        };

        match pending {
            None => {
                info!(path = %self.path, version = ?node.version, "fetched new revision");
                self.notify(&content, &node);
                Ok(CycleOutcome::Fetched)
            }
            Some(local) => {
                let remote = RemoteSide::new(node, RemoteContent::ready(content));
                self.resolve_conflict(epoch, local, remote).await
            }
        }
    }

    async fn push_pending(&self, epoch: u64) -> Result<CycleOutcome, CacheError> {
        let (local, content) = {
            let _record = lock(&self.record);
            match self.cache.get(&self.path)? {
                (Some(node), Some(content)) if node.is_pending() => (node, content),
                (Some(node), None) if node.is_pending() => {
                    warn!(path = %self.path, "pending edit has no cached content");
                    return Ok(CycleOutcome::Failed);
                }
                _ => return Ok(CycleOutcome::Unchanged),
            }
        };

        let precondition = Precondition::for_version(local.version.as_deref());
        let outcome = self
            .remote
            .put(&self.path, &content, &local.content_type, precondition)
            .await;
        match outcome {
            Ok(PutOutcome::Stored(confirmed)) => {
                if !self.confirm(epoch, &content, confirmed)? {
                    return Ok(CycleOutcome::Discarded);
                }
                info!(path = %self.path, "pushed pending edit");
                Ok(CycleOutcome::Pushed)
            }
            Ok(PutOutcome::Conflict) => {
                info!(path = %self.path, version = ?local.version, "push rejected: remote has moved on");
                self.fetch_conflict(epoch, local).await
            }
            Err(e) => {
                self.transport_failed("put", &e);
                Ok(CycleOutcome::PushFailed)
            }
        }
    }

    /// Fetch the remote side after a rejected push.
    async fn fetch_conflict(&self, epoch: u64, local: Node) -> Result<CycleOutcome, CacheError> {
        match self.remote.get(&self.path, None).await {
            Ok(GetOutcome::Fetched { node, content }) => {
                self.resolve_conflict(epoch, local, RemoteSide::new(node, content))
                    .await
            }
            Ok(GetOutcome::NotFound) => {
                // Deleted remotely: the next push may only recreate it.
                let _record = lock(&self.record);
                if self.is_current(epoch) {
                    if let Some(current) = self.cache.get_node(&self.path)? {
                        let node = Node::unconfirmed(None, current.content_type);
                        self.cache.set_node(&self.path, &node)?;
                    }
                }
                warn!(path = %self.path, "resource vanished remotely; will recreate");
                Ok(CycleOutcome::PushFailed)
            }
            Ok(GetOutcome::Unchanged) => Ok(CycleOutcome::PushFailed),
            Err(e) => {
                self.transport_failed("get", &e);
                Ok(CycleOutcome::PushFailed)
            }
        }
    }

    async fn resolve_conflict(
        &self,
        epoch: u64,
        local: Node,
        remote: RemoteSide,
    ) -> Result<CycleOutcome, CacheError> {
        if !self.is_current(epoch) {
            return Ok(CycleOutcome::Discarded);
        }
        let remote_version = remote.node().version.clone();
        info!(
            path = %self.path,
            local_version = ?local.version,
            remote_version = ?remote_version,
            "conflict detected"
        );

        let resolution = match self
            .resolver
            .resolve(LocalSide::new(&self.path, local, &self.cache), remote)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                error!(path = %self.path, error = %e, "conflict resolver failed");
                return Ok(CycleOutcome::Failed);
            }
        };

        let resolved = Node::unconfirmed(remote_version.clone(), resolution.content_type.clone());
        {
            let _record = lock(&self.record);
            if !self.is_current(epoch) {
                return Ok(CycleOutcome::Discarded);
            }
            self.cache.set(&self.path, &resolved, &resolution.content)?;
        }
        self.notify(&resolution.content, &resolved);

        let precondition = Precondition::for_version(remote_version.as_deref());
        match self
            .remote
            .put(&self.path, &resolution.content, &resolution.content_type, precondition)
            .await
        {
            Ok(PutOutcome::Stored(confirmed)) => {
                if !self.confirm(epoch, &resolution.content, confirmed)? {
                    return Ok(CycleOutcome::Discarded);
                }
            }
            Ok(PutOutcome::Conflict) => {
                info!(path = %self.path, "resolution push rejected; retrying next cycle")
            }
            Err(e) => self.transport_failed("put", &e),
        }
        Ok(CycleOutcome::Resolved)
    }

    /// Record a server-confirmed push of `pushed`.
    ///
    /// If the local content changed while the push was in flight, the newer
    /// edit stays pending on top of the confirmed version. Returns `false`
    /// when the cycle has been discarded.
    fn confirm(&self, epoch: u64, pushed: &str, confirmed: Node) -> Result<bool, CacheError> {
        let _record = lock(&self.record);
        if !self.is_current(epoch) {
            return Ok(false);
        }
        match self.cache.get(&self.path)? {
            (Some(current), Some(content)) if current.is_pending() && content != pushed => {
                let node = Node::unconfirmed(confirmed.version, current.content_type);
                self.cache.set_node(&self.path, &node)?;
            }
            _ => self.cache.set_node(&self.path, &confirmed)?,
        }
        Ok(true)
    }
}

struct Busy<'a>(&'a AtomicBool);

impl<'a> Busy<'a> {
    fn enter(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for Busy<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

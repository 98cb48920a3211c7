//! resync core library.
//!
//! Keeps named resources consistent between a durable local cache and a
//! remote, version-tracked HTTP store: the local cache, the remote client
//! contract and its HTTP implementation, conflict resolution policies, the
//! per-resource sync engine, and account discovery and authorization.

pub mod auth;
pub mod cache;
pub mod config;
pub mod conflict;
pub mod discovery;
pub mod errors;
pub mod models;
pub mod remote;
pub mod resource;
pub mod scheduler;

// Re-exports for convenience.
pub use cache::LocalCache;
pub use config::AppConfig;
pub use conflict::ConflictResolver;
pub use errors::CoreError;
pub use models::{CycleOutcome, Node, ResourceState};
pub use remote::{HttpRemote, RemoteClient};
pub use resource::SyncResource;

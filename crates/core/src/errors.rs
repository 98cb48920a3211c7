//! Error types for the resync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Local cache errors
// ---------------------------------------------------------------------------

/// Errors from the local cache and its storage backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Underlying rusqlite error.
    #[error("cache database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("cache migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record could not be encoded for storage.
    #[error("failed to encode cache record for '{key}': {detail}")]
    Encode { key: String, detail: String },

    /// Generic I/O error (e.g. creating the data directory).
    #[error("cache I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Remote store errors
// ---------------------------------------------------------------------------

/// Transport-level failures talking to the remote store.
///
/// Stale-precondition responses are *not* errors; they are reported as
/// [`PutOutcome::Conflict`](crate::remote::PutOutcome::Conflict).
#[derive(Debug, Error)]
pub enum RemoteError {
    /// HTTP-level transport error (network, TLS, timeout, body decoding).
    #[error("remote HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The bearer token was rejected.
    #[error("remote rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    /// The server answered with a status the protocol does not expect.
    #[error("unexpected response from remote for '{path}' (HTTP {status})")]
    UnexpectedStatus { path: String, status: u16 },

    /// A successful response omitted the version header.
    #[error("remote response for '{path}' carried no ETag")]
    MissingVersion { path: String },

    /// The remote could not be reached at all (used by offline fakes).
    #[error("remote unreachable: {0}")]
    Unreachable(String),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors raised while resolving a conflict.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// The local content needed for resolution is missing from the cache.
    #[error("no local content cached for '{0}'")]
    MissingLocalContent(String),

    /// Reading the remote side failed.
    #[error("failed to read remote content: {0}")]
    Remote(#[from] RemoteError),

    /// Reading the local side failed.
    #[error("failed to read local content: {0}")]
    Cache(#[from] CacheError),

    /// One of the sides is not in the shape the resolver expects.
    #[error("cannot merge {side} content: {detail}")]
    InvalidContent { side: &'static str, detail: String },
}

// ---------------------------------------------------------------------------
// Discovery errors
// ---------------------------------------------------------------------------

/// Errors from WebFinger discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The lookup answered with a non-success status.
    #[error("webfinger lookup failed (HTTP {status})")]
    Status { status: u16 },

    /// The lookup could not be performed.
    #[error("webfinger HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The identifier could not be mapped to a host.
    #[error("invalid resource identifier '{0}'")]
    InvalidResource(String),

    /// The descriptor contains no remote storage link.
    #[error("no remote storage link for '{0}'")]
    NoStorageLink(String),
}

impl DiscoveryError {
    /// The HTTP status carried by a failed lookup, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status } => Some(*status),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Authorization errors
// ---------------------------------------------------------------------------

/// Errors from the authorization redirect flow and session storage.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The authorization server reported an error in the redirect.
    #[error("authorization denied: {0}")]
    Denied(String),

    /// The redirect carried neither a token nor an error.
    #[error("redirect carries no access token")]
    MissingToken,

    /// A URL could not be parsed.
    #[error("invalid URL '{url}': {detail}")]
    InvalidUrl { url: String, detail: String },

    /// No session has been stored yet.
    #[error("not connected; run the login flow first")]
    NotConnected,

    /// Persisting or loading the session failed.
    #[error("session storage error: {0}")]
    Cache(#[from] CacheError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

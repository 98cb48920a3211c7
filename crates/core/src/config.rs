//! TOML-based configuration for resync.
//!
//! Secrets are never written to the file. A pre-issued bearer token can be
//! supplied through the environment variable named by `account.token_env`
//! and is resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::conflict::{ConflictResolver, KeepLocal, TakeRemote, UnionByKey};
use crate::discovery::domain_of;
use crate::errors::ConfigError;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Who to connect as.
    pub account: AccountConfig,

    /// Polling and conflict settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Local cache location.
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Account
// ---------------------------------------------------------------------------

/// Account and authorization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// User identifier to discover, e.g. `acct:user@example.com`.
    pub resource: String,

    /// OAuth client id sent in the authorization request.
    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Requested access scope, e.g. `todos:rw`.
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Where the authorization server sends the browser back to.
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    /// Storage root to use instead of discovering it.
    #[serde(default)]
    pub storage_url: Option<String>,

    /// Environment variable holding a pre-issued bearer token.
    #[serde(default)]
    pub token_env: Option<String>,

    /// Resolved token (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub token: Option<String>,
}

fn default_client_id() -> String {
    "resync".into()
}
fn default_scope() -> String {
    "*:rw".into()
}
fn default_redirect_uri() -> String {
    "http://localhost:8000/".into()
}

// ---------------------------------------------------------------------------
// Sync
// ---------------------------------------------------------------------------

/// How conflicting edits are merged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the local edit and overwrite the remote.
    #[default]
    KeepLocal,
    /// Discard the local edit.
    TakeRemote,
    /// Merge JSON arrays of entries by `union_key`.
    Union,
}

/// Polling and conflict settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Milliseconds between polls (default 2000).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-request HTTP timeout in seconds (default 30).
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub conflict: ConflictPolicy,

    /// Entry field used as identity by the `union` policy.
    #[serde(default = "default_union_key")]
    pub union_key: String,

    /// Entry field the `union` policy sorts by, newest first.
    #[serde(default)]
    pub union_order_by: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_union_key() -> String {
    "id".into()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            conflict: ConflictPolicy::default(),
            union_key: default_union_key(),
            union_order_by: None,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The configured conflict policy as a resolver.
    pub fn resolver(&self) -> Arc<dyn ConflictResolver> {
        match self.conflict {
            ConflictPolicy::KeepLocal => Arc::new(KeepLocal),
            ConflictPolicy::TakeRemote => Arc::new(TakeRemote),
            ConflictPolicy::Union => {
                let policy = UnionByKey::new(self.union_key.clone());
                match &self.union_order_by {
                    Some(field) => Arc::new(policy.ordered_by(field.clone())),
                    None => Arc::new(policy),
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding the cache database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".resync")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl CacheConfig {
    /// Path of the SQLite cache file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Render as TOML, e.g. for `init`.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Resolve `_env` references into their values.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(ref env_name) = self.account.token_env {
            self.account.token = resolve_optional_env(env_name, "account.token_env");
        }
        Ok(())
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.resource.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "account.resource".into(),
                detail: "resource must not be empty".into(),
            });
        }
        if self.account.storage_url.is_none() {
            domain_of(&self.account.resource).map_err(|e| ConfigError::InvalidValue {
                field: "account.resource".into(),
                detail: e.to_string(),
            })?;
        }
        if self.account.client_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "account.client_id".into(),
                detail: "client id must not be empty".into(),
            });
        }
        if self.sync.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.poll_interval_ms".into(),
                detail: "poll interval must be > 0".into(),
            });
        }
        if self.sync.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.request_timeout_secs".into(),
                detail: "request timeout must be > 0".into(),
            });
        }
        if self.sync.conflict == ConflictPolicy::Union && self.sync.union_key.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "sync.union_key".into(),
                detail: "union policy needs a key field".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "logging.level".into(),
                detail: format!("expected one of {}", LOG_LEVELS.join(", ")),
            });
        }

        Ok(())
    }

    /// Convenience: load, resolve, and validate in one call.
    pub fn load_and_resolve<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }
}

/// Try to read an environment variable by name. Returns `Some(value)` on
/// success; logs a warning and returns `None` if the variable is unset.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            warn!(field, env_name, "env var not set");
            None
        }
    }
}

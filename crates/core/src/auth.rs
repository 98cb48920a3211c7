//! Implicit-grant authorization and the stored session.
//!
//! The flow has two halves. [`build_auth_url`] produces the URL the user
//! opens in a browser; the authorization server then redirects back with the
//! outcome in the URL fragment, which [`parse_redirect`] turns into a bearer
//! token. The token, the storage endpoint and the account identifier are kept
//! in the cache's `session` namespace so later runs can [`connect`] without
//! repeating the flow.

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{LocalCache, Namespace};
use crate::discovery::Discovery;
use crate::errors::{AuthError, CacheError, CoreError};
use crate::remote::HttpRemote;

const SESSION_KEY: &str = "current";

// ---------------------------------------------------------------------------
// Authorization URL and redirect
// ---------------------------------------------------------------------------

/// Parameters of an authorization request.
#[derive(Debug, Clone)]
pub struct AuthRequest<'a> {
    pub redirect_uri: &'a str,
    pub client_id: &'a str,
    pub scope: &'a str,
}

/// Build the implicit-grant authorization URL on `auth_endpoint`.
pub fn build_auth_url(auth_endpoint: &str, request: &AuthRequest<'_>) -> Result<Url, AuthError> {
    let mut url = Url::parse(auth_endpoint).map_err(|e| AuthError::InvalidUrl {
        url: auth_endpoint.to_string(),
        detail: e.to_string(),
    })?;
    url.query_pairs_mut()
        .append_pair("redirect_uri", request.redirect_uri)
        .append_pair("scope", request.scope)
        .append_pair("client_id", request.client_id)
        .append_pair("response_type", "token");
    debug!(url = %url, "built authorization url");
    Ok(url)
}

/// Extract the access token from the URL the browser was redirected to.
///
/// The outcome travels in the fragment as form-encoded pairs. An `error`
/// takes precedence over a token.
pub fn parse_redirect(redirect: &str) -> Result<String, AuthError> {
    let invalid = |detail: String| AuthError::InvalidUrl {
        url: redirect.to_string(),
        detail,
    };
    let url = Url::parse(redirect).map_err(|e| invalid(e.to_string()))?;
    let fragment = url.fragment().ok_or(AuthError::MissingToken)?;

    // Reuse the query parser for the fragment.
    let mut carrier = Url::parse("http://redirect.invalid/").map_err(|e| invalid(e.to_string()))?;
    carrier.set_query(Some(fragment));

    let mut token = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in carrier.query_pairs() {
        match key.as_ref() {
            "access_token" => token = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        let reason = match description {
            Some(d) => format!("{}: {}", error, d),
            None => error,
        };
        warn!(reason = %reason, "authorization server returned an error");
        return Err(AuthError::Denied(reason));
    }
    match token {
        Some(t) if !t.is_empty() => Ok(t),
        _ => Err(AuthError::MissingToken),
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Credentials for one connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub resource: String,
    /// Storage root the token is valid for.
    pub endpoint: String,
    pub token: String,
}

impl Session {
    /// Discover the storage root for `resource` and pair it with `token`.
    pub async fn establish(
        discovery: &Discovery,
        resource: &str,
        token: impl Into<String>,
    ) -> Result<Self, CoreError> {
        let record = discovery.storage(resource).await?;
        Ok(Self {
            resource: resource.to_string(),
            endpoint: record.href,
            token: token.into(),
        })
    }
}

/// Persists the [`Session`] alongside the cached records.
#[derive(Clone)]
pub struct SessionStore {
    cache: LocalCache,
}

impl SessionStore {
    pub fn new(cache: LocalCache) -> Self {
        Self { cache }
    }

    pub fn load(&self) -> Result<Option<Session>, AuthError> {
        let Some(raw) = self.cache.store().get(Namespace::Session, SESSION_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                warn!(error = %e, "ignoring malformed stored session");
                Ok(None)
            }
        }
    }

    /// The stored session, or [`AuthError::NotConnected`].
    pub fn require(&self) -> Result<Session, AuthError> {
        self.load()?.ok_or(AuthError::NotConnected)
    }

    pub fn save(&self, session: &Session) -> Result<(), AuthError> {
        let raw = serde_json::to_string(session).map_err(|e| CacheError::Encode {
            key: SESSION_KEY.to_string(),
            detail: e.to_string(),
        })?;
        self.cache.store().put(Namespace::Session, SESSION_KEY, &raw)?;
        info!(resource = %session.resource, endpoint = %session.endpoint, "session stored");
        Ok(())
    }

    pub fn clear(&self) -> Result<(), AuthError> {
        self.cache.store().clear(&[Namespace::Session])?;
        Ok(())
    }
}

/// An authenticated remote for a stored session.
pub fn connect(session: &Session, timeout: Duration) -> Result<HttpRemote, CoreError> {
    Ok(HttpRemote::new(&session.endpoint, &session.token, timeout)?)
}

/// Drop every cached record and the stored session.
pub fn forget(cache: &LocalCache) -> Result<(), AuthError> {
    cache.clear()?;
    SessionStore::new(cache.clone()).clear()?;
    info!("forgot cached data and session");
    Ok(())
}

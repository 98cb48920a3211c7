//! WebFinger discovery of a user's storage endpoint.
//!
//! `lookup("acct:user@example.com")` fetches
//! `https://example.com/.well-known/webfinger?resource=acct%3Auser%40example.com`
//! and returns the JSON resource descriptor. [`StorageRecord::from_jrd`]
//! then picks out the remote-storage link: its `href` is the storage root,
//! and its properties name the protocol version and the OAuth authorization
//! endpoint.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::errors::DiscoveryError;

pub const JRD_CONTENT_TYPE: &str = "application/jrd+json";

/// Link relations that identify a remote storage server.
pub const STORAGE_RELS: &[&str] = &[
    "http://tools.ietf.org/id/draft-dejong-remotestorage",
    "remotestorage",
];

/// Link property carrying the storage protocol version.
pub const PROP_STORAGE_VERSION: &str = "http://remotestorage.io/spec/version";

/// Link property carrying the OAuth implicit-grant endpoint.
pub const PROP_AUTH_ENDPOINT: &str = "http://tools.ietf.org/html/rfc6749#section-4.2";

// ---------------------------------------------------------------------------
// Descriptor types
// ---------------------------------------------------------------------------

/// JSON Resource Descriptor (RFC 7033).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jrd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub rel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Option<String>>,
}

impl Link {
    fn property(&self, name: &str) -> Option<String> {
        self.properties.get(name).cloned().flatten()
    }
}

/// Where and how to reach a user's storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRecord {
    /// Storage root; resource paths are appended to it.
    pub href: String,
    pub storage_version: Option<String>,
    pub auth_endpoint: Option<String>,
}

impl StorageRecord {
    /// Extract the remote-storage link from a descriptor.
    pub fn from_jrd(resource: &str, jrd: &Jrd) -> Result<Self, DiscoveryError> {
        let link = jrd
            .links
            .iter()
            .find(|l| STORAGE_RELS.contains(&l.rel.as_str()) && l.href.is_some())
            .ok_or_else(|| DiscoveryError::NoStorageLink(resource.to_string()))?;

        Ok(Self {
            href: link.href.clone().unwrap_or_default(),
            storage_version: link.property(PROP_STORAGE_VERSION),
            auth_endpoint: link.property(PROP_AUTH_ENDPOINT),
        })
    }
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// The host a resource identifier is discovered on.
///
/// `acct:` identifiers use everything after the last `@`; other URLs use
/// their host.
pub fn domain_of(resource: &str) -> Result<String, DiscoveryError> {
    let invalid = || DiscoveryError::InvalidResource(resource.to_string());

    if let Some(acct) = resource.strip_prefix("acct:") {
        let (_, domain) = acct.rsplit_once('@').ok_or_else(invalid)?;
        if domain.is_empty() {
            return Err(invalid());
        }
        return Ok(domain.to_string());
    }

    let url = Url::parse(resource).map_err(|_| invalid())?;
    url.host_str().map(str::to_string).ok_or_else(invalid)
}

/// The WebFinger URL for `resource` on its own host.
pub fn webfinger_url(resource: &str) -> Result<Url, DiscoveryError> {
    let origin = format!("https://{}", domain_of(resource)?);
    webfinger_url_at(&origin, resource)
}

fn webfinger_url_at(origin: &str, resource: &str) -> Result<Url, DiscoveryError> {
    let base = format!("{}/.well-known/webfinger", origin.trim_end_matches('/'));
    let mut url =
        Url::parse(&base).map_err(|_| DiscoveryError::InvalidResource(resource.to_string()))?;
    url.query_pairs_mut().append_pair("resource", resource);
    Ok(url)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// WebFinger client.
#[derive(Debug, Clone)]
pub struct Discovery {
    http: reqwest::Client,
    origin: Option<String>,
}

impl Discovery {
    pub fn new(timeout: Duration) -> Result<Self, DiscoveryError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("resync/", env!("CARGO_PKG_VERSION"))),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        Ok(Self { http, origin: None })
    }

    /// Send lookups to `origin` instead of `https://<domain>`.
    ///
    /// Useful against local or test servers.
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Fetch the resource descriptor for `resource`.
    #[instrument(skip(self))]
    pub async fn lookup(&self, resource: &str) -> Result<Jrd, DiscoveryError> {
        let url = match &self.origin {
            Some(origin) => webfinger_url_at(origin, resource)?,
            None => webfinger_url(resource)?,
        };
        debug!(url = %url, "webfinger lookup");

        let resp = self
            .http
            .get(url)
            .header(ACCEPT, JRD_CONTENT_TYPE)
            .send()
            .await?;

        if resp.status() != StatusCode::OK {
            let status = resp.status().as_u16();
            warn!(status, "webfinger lookup failed");
            return Err(DiscoveryError::Status { status });
        }

        let jrd: Jrd = resp.json().await?;
        info!(links = jrd.links.len(), "webfinger lookup succeeded");
        Ok(jrd)
    }

    /// Look up `resource` and extract its storage record.
    pub async fn storage(&self, resource: &str) -> Result<StorageRecord, DiscoveryError> {
        let jrd = self.lookup(resource).await?;
        StorageRecord::from_jrd(resource, &jrd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_of_acct() {
        assert_eq!(domain_of("acct:user@example.com").unwrap(), "example.com");
        assert_eq!(domain_of("acct:a@b@host.org").unwrap(), "host.org");
        assert!(domain_of("acct:nobody").is_err());
        assert!(domain_of("acct:user@").is_err());
    }

    #[test]
    fn test_domain_of_url() {
        assert_eq!(domain_of("https://alice.example/profile").unwrap(), "alice.example");
        assert!(matches!(
            domain_of("not a url"),
            Err(DiscoveryError::InvalidResource(_))
        ));
    }

    #[test]
    fn test_webfinger_url_encodes_resource() {
        let url = webfinger_url("acct:user@example.com").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/.well-known/webfinger?resource=acct%3Auser%40example.com"
        );
    }

    #[test]
    fn test_storage_record_from_jrd() {
        let jrd: Jrd = serde_json::from_str(
            r#"{
                "subject": "acct:user@example.com",
                "links": [
                    {"rel": "self", "href": "https://example.com/user"},
                    {
                        "rel": "http://tools.ietf.org/id/draft-dejong-remotestorage",
                        "href": "https://storage.example.com/user",
                        "properties": {
                            "http://remotestorage.io/spec/version": "draft-dejong-remotestorage-13",
                            "http://tools.ietf.org/html/rfc6749#section-4.2": "https://example.com/oauth/user",
                            "http://tools.ietf.org/html/rfc7233": null
                        }
                    }
                ]
            }"#,
        )
        .unwrap();

        let record = StorageRecord::from_jrd("acct:user@example.com", &jrd).unwrap();
        assert_eq!(record.href, "https://storage.example.com/user");
        assert_eq!(
            record.storage_version.as_deref(),
            Some("draft-dejong-remotestorage-13")
        );
        assert_eq!(
            record.auth_endpoint.as_deref(),
            Some("https://example.com/oauth/user")
        );
    }

    #[test]
    fn test_storage_record_missing_link() {
        let jrd = Jrd {
            links: vec![Link {
                rel: "self".into(),
                href: Some("https://example.com".into()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(matches!(
            StorageRecord::from_jrd("acct:user@example.com", &jrd),
            Err(DiscoveryError::NoStorageLink(_))
        ));
    }
}

//! HTTP implementation of [`RemoteClient`].
//!
//! Versions travel as `ETag` values and are passed back verbatim in
//! `If-None-Match` / `If-Match`. Status mapping:
//!
//! | status  | GET          | PUT          |
//! |---------|--------------|--------------|
//! | 200/201 | fetched      | stored       |
//! | 304     | unchanged    | -            |
//! | 404     | not found    | -            |
//! | 412     | -            | conflict     |
//! | 401/403 | unauthorized | unauthorized |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, ETAG, IF_MATCH, IF_NONE_MATCH, USER_AGENT};
use reqwest::StatusCode;
use tracing::{debug, info, instrument};

use super::{GetOutcome, Precondition, PutOutcome, RemoteClient, RemoteContent};
use crate::errors::RemoteError;
use crate::models::Node;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Authenticated client bound to one storage endpoint.
#[derive(Clone)]
pub struct HttpRemote {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl HttpRemote {
    /// Build a client for `endpoint` using bearer `token`.
    ///
    /// `timeout` bounds each request; a timed-out request surfaces as a
    /// transport error.
    pub fn new(
        endpoint: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("resync/", env!("CARGO_PKG_VERSION"))),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;
        info!(endpoint = %endpoint, "created HttpRemote");
        Ok(Self {
            http,
            endpoint,
            token: token.into(),
        })
    }

    /// The storage root this client writes under.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Absolute URL of `path` under the endpoint.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path.trim_start_matches('/'))
    }

    fn version_of(path: &str, resp: &reqwest::Response) -> Result<String, RemoteError> {
        resp.headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RemoteError::MissingVersion {
                path: path.to_string(),
            })
    }

    fn unexpected(path: &str, status: StatusCode) -> RemoteError {
        match status.as_u16() {
            401 | 403 => RemoteError::Unauthorized {
                status: status.as_u16(),
            },
            other => RemoteError::UnexpectedStatus {
                path: path.to_string(),
                status: other,
            },
        }
    }
}

#[async_trait]
impl RemoteClient for HttpRemote {
    #[instrument(skip(self))]
    async fn get(
        &self,
        path: &str,
        if_none_match: Option<&str>,
    ) -> Result<GetOutcome, RemoteError> {
        let mut req = self.http.get(self.url_for(path)).bearer_auth(&self.token);
        if let Some(version) = if_none_match {
            req = req.header(IF_NONE_MATCH, version);
        }
        let resp = req.send().await?;
        let status = resp.status();

        match status {
            StatusCode::NOT_MODIFIED => {
                debug!("remote unchanged");
                Ok(GetOutcome::Unchanged)
            }
            StatusCode::NOT_FOUND => {
                debug!("remote has no record");
                Ok(GetOutcome::NotFound)
            }
            s if s.is_success() => {
                let version = Self::version_of(path, &resp)?;
                let content_type = resp
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(DEFAULT_CONTENT_TYPE)
                    .to_string();
                debug!(version = %version, "fetched new remote revision");
                Ok(GetOutcome::Fetched {
                    node: Node::confirmed(version, content_type),
                    content: RemoteContent::from_response(resp),
                })
            }
            s => Err(Self::unexpected(path, s)),
        }
    }

    #[instrument(skip(self, content), fields(bytes = content.len()))]
    async fn put(
        &self,
        path: &str,
        content: &str,
        content_type: &str,
        precondition: Precondition,
    ) -> Result<PutOutcome, RemoteError> {
        let mut req = self
            .http
            .put(self.url_for(path))
            .bearer_auth(&self.token)
            .header(CONTENT_TYPE, content_type)
            .body(content.to_string());
        req = match &precondition {
            Precondition::None => req,
            Precondition::IfMatch(version) => req.header(IF_MATCH, version.as_str()),
            Precondition::IfAbsent => req.header(IF_NONE_MATCH, "*"),
        };
        let resp = req.send().await?;
        let status = resp.status();

        match status {
            StatusCode::PRECONDITION_FAILED => {
                debug!("remote rejected stale write");
                Ok(PutOutcome::Conflict)
            }
            s if s.is_success() => {
                let version = Self::version_of(path, &resp)?;
                debug!(version = %version, "remote accepted write");
                Ok(PutOutcome::Stored(Node::confirmed(version, content_type)))
            }
            s => Err(Self::unexpected(path, s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_joins_segments() {
        let remote =
            HttpRemote::new("https://storage.example.com/user/", "t", Duration::from_secs(5))
                .unwrap();
        assert_eq!(remote.endpoint(), "https://storage.example.com/user");
        assert_eq!(
            remote.url_for("/todos/list"),
            "https://storage.example.com/user/todos/list"
        );
        assert_eq!(
            remote.url_for("todos"),
            "https://storage.example.com/user/todos"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            HttpRemote::unexpected("a", StatusCode::UNAUTHORIZED),
            RemoteError::Unauthorized { status: 401 }
        ));
        assert!(matches!(
            HttpRemote::unexpected("a", StatusCode::INTERNAL_SERVER_ERROR),
            RemoteError::UnexpectedStatus { status: 500, .. }
        ));
    }
}

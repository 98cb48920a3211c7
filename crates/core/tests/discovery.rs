//! WebFinger discovery and login against an in-process server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;

use resync_core::auth::{build_auth_url, parse_redirect, AuthRequest, Session, SessionStore};
use resync_core::cache::LocalCache;
use resync_core::discovery::{webfinger_url, Discovery, StorageRecord};
use resync_core::errors::{CoreError, DiscoveryError};

/// What the server saw: raw query string and `Accept` header.
type Seen = Arc<Mutex<Vec<(Option<String>, Option<String>)>>>;

async fn webfinger(
    State(seen): State<Seen>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let accept = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    seen.lock().unwrap().push((query.clone(), accept));

    match query.as_deref() {
        Some("resource=acct%3Auser%40example.com") => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/jrd+json")],
            json!({
                "subject": "acct:user@example.com",
                "links": [{
                    "rel": "http://tools.ietf.org/id/draft-dejong-remotestorage",
                    "href": "https://storage.example.com/user",
                    "properties": {
                        "http://remotestorage.io/spec/version": "draft-dejong-remotestorage-13",
                        "http://tools.ietf.org/html/rfc6749#section-4.2": "https://example.com/oauth/user"
                    }
                }]
            })
            .to_string(),
        )
            .into_response(),
        Some("resource=acct%3Abare%40example.com") => (
            StatusCode::OK,
            json!({"subject": "acct:bare@example.com", "links": []}).to_string(),
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_server() -> (String, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), seen)
}

fn discovery(origin: &str) -> Discovery {
    Discovery::new(Duration::from_secs(5))
        .unwrap()
        .with_origin(origin)
}

#[test]
fn test_lookup_url() {
    assert_eq!(
        webfinger_url("acct:user@example.com").unwrap().as_str(),
        "https://example.com/.well-known/webfinger?resource=acct%3Auser%40example.com"
    );
}

#[tokio::test]
async fn test_lookup_sends_jrd_accept_header() {
    let (origin, seen) = spawn_server().await;
    let jrd = discovery(&origin).lookup("acct:user@example.com").await.unwrap();

    assert_eq!(jrd.subject.as_deref(), Some("acct:user@example.com"));
    assert_eq!(
        seen.lock().unwrap().as_slice(),
        &[(
            Some("resource=acct%3Auser%40example.com".to_string()),
            Some("application/jrd+json".to_string())
        )]
    );
}

#[tokio::test]
async fn test_lookup_not_found_carries_status() {
    let (origin, _) = spawn_server().await;
    let err = discovery(&origin)
        .lookup("acct:nobody@example.com")
        .await
        .unwrap_err();

    assert!(matches!(err, DiscoveryError::Status { status: 404 }));
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_storage_record() {
    let (origin, _) = spawn_server().await;
    let disco = discovery(&origin);

    let record = disco.storage("acct:user@example.com").await.unwrap();
    assert_eq!(
        record,
        StorageRecord {
            href: "https://storage.example.com/user".into(),
            storage_version: Some("draft-dejong-remotestorage-13".into()),
            auth_endpoint: Some("https://example.com/oauth/user".into()),
        }
    );

    assert!(matches!(
        disco.storage("acct:bare@example.com").await,
        Err(DiscoveryError::NoStorageLink(_))
    ));
}

#[tokio::test]
async fn test_login_flow_stores_session() {
    let (origin, _) = spawn_server().await;
    let disco = discovery(&origin);
    let resource = "acct:user@example.com";

    let record = disco.storage(resource).await.unwrap();
    let auth_endpoint = record.auth_endpoint.unwrap();
    let url = build_auth_url(
        &auth_endpoint,
        &AuthRequest {
            redirect_uri: "http://localhost:8000/",
            client_id: "resync",
            scope: "todos:rw",
        },
    )
    .unwrap();
    assert!(url.as_str().ends_with("&response_type=token"));

    // The browser comes back with the token in the fragment.
    let token = parse_redirect("http://localhost:8000/#access_token=tok&token_type=bearer").unwrap();
    let session = Session::establish(&disco, resource, token).await.unwrap();
    assert_eq!(session.endpoint, "https://storage.example.com/user");

    let store = SessionStore::new(LocalCache::in_memory());
    store.save(&session).unwrap();
    assert_eq!(store.require().unwrap(), session);
}

#[tokio::test]
async fn test_establish_propagates_discovery_failure() {
    let (origin, _) = spawn_server().await;
    let err = Session::establish(&discovery(&origin), "acct:ghost@example.com", "tok")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Discovery(DiscoveryError::Status { status: 404 })
    ));
}

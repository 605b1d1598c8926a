//! Retry behavior of the signed JSON client against a local mock.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use reqwest::Url;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use page_ingest::remote::{RemoteClient, RemoteFailure};
use page_ingest::retry::RetryPolicy;
use page_ingest::sigv4::{Credentials, SigV4Signer};

/// Statuses returned in order; the last one repeats.
#[derive(Clone)]
struct Script {
    statuses: Arc<Vec<u16>>,
    requests: Arc<AtomicUsize>,
}

async fn ingest(State(script): State<Script>, headers: HeaderMap) -> (StatusCode, String) {
    assert!(headers.contains_key("authorization"));
    let n = script.requests.fetch_add(1, Ordering::SeqCst);
    let code = script.statuses[n.min(script.statuses.len() - 1)];
    (StatusCode::from_u16(code).unwrap(), format!("status {}", code))
}

async fn start(statuses: &[u16]) -> (Arc<AtomicUsize>, SocketAddr) {
    let script = Script {
        statuses: Arc::new(statuses.to_vec()),
        requests: Arc::new(AtomicUsize::new(0)),
    };
    let requests = script.requests.clone();
    let app = Router::new()
        .route("/pages/ingest", post(ingest))
        .with_state(script);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (requests, addr)
}

fn client(max_attempts: u32) -> RemoteClient {
    let signer = SigV4Signer::new(Credentials::new("AKIDEXAMPLE", "secret"), "us-east-1", "osis");
    let retry = RetryPolicy {
        max_attempts,
        base_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
    };
    let http = RemoteClient::http_client(Duration::from_secs(5)).unwrap();
    RemoteClient::new(http, signer, retry)
}

fn url(addr: SocketAddr) -> Url {
    Url::parse(&format!("http://{}/pages/ingest", addr)).unwrap()
}

#[tokio::test]
async fn transient_status_is_retried_until_success() {
    let (requests, addr) = start(&[503, 200]).await;

    let body = client(3).post_json(&url(addr), b"[]").await.unwrap();

    assert_eq!(body, "status 200");
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn throttling_is_retried() {
    let (requests, addr) = start(&[429, 429, 200]).await;

    assert!(client(3).post_json(&url(addr), b"[]").await.is_ok());
    assert_eq!(requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn client_error_fails_without_retry() {
    let (requests, addr) = start(&[400, 200]).await;

    let err = client(3).post_json(&url(addr), b"[]").await.unwrap_err();

    assert_eq!(
        err,
        RemoteFailure::Status {
            status: 400,
            body: "status 400".into()
        }
    );
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let (requests, addr) = start(&[503]).await;

    let err = client(3).post_json(&url(addr), b"[]").await.unwrap_err();

    assert!(matches!(err, RemoteFailure::Status { status: 503, .. }), "{:?}", err);
    assert_eq!(requests.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn transport_errors_are_retried_then_reported() {
    // Bind then drop a listener so the port refuses connections.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(2).post_json(&url(addr), b"[]").await.unwrap_err();

    assert!(matches!(err, RemoteFailure::Transport(_)), "{:?}", err);
}

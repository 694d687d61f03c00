//! Challenge dispatch and HTTP responder integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use certinel::acme::{ChallengeResponder, ChallengeSet};
use certinel::challenge_server::run_challenge_server;
use certinel::{Certs, CertsError};

use common::{harness, harness_with, Harness};

async fn register_challenge(h: &Harness, domain: &str, token: &str, auth: &str) {
    h.seed_domain(domain).await;
    h.certs
        .challenge_store()
        .set(ChallengeSet {
            domain: domain.to_string(),
            token: token.to_string(),
            key_authorization: auth.to_string(),
        })
        .await
        .unwrap();
}

// ============================================================================
// Dispatcher
// ============================================================================

#[tokio::test]
async fn test_route_handler_serves_stored_authorization() {
    let h = harness();
    register_challenge(&h, "example.com", "TKN", "abc.def").await;

    let body = h.certs.route_handler("example.com", "TKN").await.unwrap();
    assert_eq!(body, "abc.def");
}

#[tokio::test]
async fn test_route_handler_after_ttl_is_not_found() {
    let h = harness_with(|options| options.with_challenge_ttl(Duration::from_millis(40)));
    register_challenge(&h, "example.com", "TKN", "abc.def").await;

    assert_eq!(
        h.certs.route_handler("example.com", "TKN").await.unwrap(),
        "abc.def"
    );

    tokio::time::sleep(Duration::from_millis(80)).await;
    let err = h.certs.route_handler("example.com", "TKN").await.unwrap_err();
    assert!(matches!(err, CertsError::ChallengeNotFound { .. }));
}

#[tokio::test]
async fn test_route_handler_unknown_token_is_not_found() {
    let h = harness();
    h.seed_domain("example.com").await;

    let err = h.certs.route_handler("example.com", "nope").await.unwrap_err();
    assert_eq!(err.http_status(), 404);
}

// ============================================================================
// Challenge HTTP server
// ============================================================================

async fn start_server(certs: Arc<Certs>) -> (String, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let addr_clone = addr.clone();
    let handle = tokio::spawn(async move {
        let _ = run_challenge_server(&addr_clone, certs, shutdown_rx).await;
    });

    // Give the server time to bind.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, shutdown_tx, handle)
}

async fn http_get(addr: &str, path: &str, host: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8_lossy(&response).to_string()
}

#[tokio::test]
async fn test_server_serves_key_authorization() {
    let h = harness();
    register_challenge(&h, "example.com", "TKN", "abc.def").await;

    let (addr, shutdown_tx, server) = start_server(Arc::clone(&h.certs)).await;

    let response = http_get(&addr, "/.well-known/acme-challenge/TKN", "example.com").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.contains("Content-Type: text/plain"));
    assert!(response.ends_with("abc.def"));

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
}

#[tokio::test]
async fn test_server_unknown_token_is_structured_404() {
    let h = harness();
    h.seed_domain("example.com").await;

    let (addr, shutdown_tx, server) = start_server(Arc::clone(&h.certs)).await;

    let response = http_get(&addr, "/.well-known/acme-challenge/ghost", "example.com").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{response}");

    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["code"], "challenge_not_found");

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
}

#[tokio::test]
async fn test_server_rejects_invalid_input() {
    let h = harness();
    let (addr, shutdown_tx, server) = start_server(Arc::clone(&h.certs)).await;

    // Token over the 256-character cap.
    let long = "a".repeat(257);
    let response = http_get(
        &addr,
        &format!("/.well-known/acme-challenge/{long}"),
        "example.com",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 400 Bad Request"), "{response}");

    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(json["code"], "invalid_input");
    assert!(json["details"]["token"].is_string());

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
}

#[tokio::test]
async fn test_server_non_challenge_path_is_404() {
    let h = harness();
    let (addr, shutdown_tx, server) = start_server(Arc::clone(&h.certs)).await;

    let response = http_get(&addr, "/health", "example.com").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found"), "{response}");

    shutdown_tx.send(true).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(2), server).await;
}

#[tokio::test]
async fn test_server_shutdown_is_clean() {
    let h = harness();
    let (_, shutdown_tx, server) = start_server(Arc::clone(&h.certs)).await;

    shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), server).await;
    assert!(result.is_ok(), "server should shut down promptly");
    assert!(result.unwrap().is_ok(), "server task should not panic");
}

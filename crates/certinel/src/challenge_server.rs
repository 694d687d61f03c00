//! Standalone HTTP-01 challenge responder
//!
//! Reference wiring for hosting servers: a minimal HTTP/1.1 listener that
//! answers `GET /.well-known/acme-challenge/<token>` from the coordinator
//! and nothing else. Useful when the ACME port (80) is served by a
//! process separate from the application frontends.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::coordinator::Certs;
use crate::errors::CertsError;

/// HTTP-01 challenge path prefix
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// Extract the challenge token from a request path
pub fn extract_token(path: &str) -> Option<&str> {
    path.strip_prefix(ACME_CHALLENGE_PREFIX)
}

/// Run the challenge server until the shutdown channel fires
pub async fn run_challenge_server(
    addr: &str,
    certs: Arc<Certs>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    debug!(addr = %addr, "Challenge server listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "Challenge server accept failed");
                        continue;
                    }
                };
                trace!(peer = %peer, "Challenge request connection");

                let certs = Arc::clone(&certs);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, certs).await {
                        trace!(error = %e, "Challenge connection error");
                    }
                });
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("Challenge server shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_connection(mut stream: TcpStream, certs: Arc<Certs>) -> std::io::Result<()> {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let response = match parse_request(&request) {
        Some((path, host)) => match extract_token(&path) {
            Some(token) => match certs.route_handler(&host, token).await {
                Ok(key_authorization) => plain_response(200, "OK", &key_authorization),
                Err(e) => error_response(&e),
            },
            None => plain_response(404, "Not Found", "not found"),
        },
        None => plain_response(400, "Bad Request", "bad request"),
    };

    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

/// Pull the GET path and Host header out of a raw request
fn parse_request(request: &str) -> Option<(String, String)> {
    let mut lines = request.lines();
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let path = parts.next()?.to_string();

    let host = lines
        .take_while(|line| !line.is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("host")
                .then(|| value.trim().to_string())
        })
        .unwrap_or_default();
    // Strip any port from the Host header.
    let host = host.split(':').next().unwrap_or("").to_string();

    Some((path, host))
}

fn plain_response(status: u16, reason: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

fn error_response(err: &CertsError) -> String {
    let body = err.to_response_json().to_string();
    let status = err.http_status();
    let reason = match status {
        400 => "Bad Request",
        403 => "Forbidden",
        404 => "Not Found",
        _ => "Internal Server Error",
    };
    format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

//! Socket-level integration tests for the connection session state machine.
//!
//! These drive a real listener over plaintext TCP (the variant that skips the
//! TLS handshake) with raw client sockets, exercising framing, dispatch,
//! keep-alive sequencing, and timeout-driven teardown. No database or cache
//! is needed: every exercised path answers before touching either backend.

use dashmap::DashMap;
use glossd::config::Config;
use glossd::connection::ConnectionSession;
use glossd::core::auth::SessionStore;
use glossd::core::cache::CacheClient;
use glossd::core::db::ConnectionPool;
use glossd::core::dispatch::{Dispatcher, Registry};
use glossd::core::handlers;
use glossd::core::rate_limit::RateLimiter;
use glossd::core::state::{ClientInfo, ServerState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

const READ_TIMEOUT: Duration = Duration::from_millis(300);

/// Builds a ServerState whose pool is empty and whose cache is never dialed.
async fn test_state() -> Arc<ServerState> {
    let mut config = Config::default();
    config.tls.enabled = false;
    config.auth.secret_key = "integration-secret".to_string();
    config.database.pool_size = 0;
    config.timeouts.read = READ_TIMEOUT;

    let db_pool = ConnectionPool::bootstrap(config.database.clone(), 0)
        .await
        .expect("empty pool needs no database");
    let cache = Arc::new(CacheClient::new(&config.cache));
    let sessions = Arc::new(SessionStore::new(
        cache.clone(),
        config.auth.secret_key.clone(),
        config.auth.session_ttl,
    ));
    let limiter = Arc::new(RateLimiter::new());
    let registry = Registry::new(handlers::builtin(&config, sessions.clone()));
    let dispatcher = Dispatcher::new(registry, limiter);

    Arc::new(ServerState {
        config,
        db_pool,
        cache,
        sessions,
        dispatcher,
        clients: DashMap::new(),
    })
}

/// Binds an ephemeral listener and serves plaintext sessions from it.
async fn spawn_server(state: Arc<ServerState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, _) = broadcast::channel(1);

    tokio::spawn(async move {
        let mut session_id = 0u64;
        while let Ok((socket, peer)) = listener.accept().await {
            session_id += 1;
            state.clients.insert(
                session_id,
                ClientInfo {
                    addr: peer,
                    created: Instant::now(),
                },
            );
            let session =
                ConnectionSession::new(state.clone(), session_id, peer, shutdown_tx.subscribe());
            tokio::spawn(session.run(socket, None));
        }
    });

    addr
}

/// Reads one HTTP response off the stream: status, headers, body.
async fn read_response(stream: &mut TcpStream) -> (u16, HashMap<String, String>, String) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    // Read until the head is complete.
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let n = timeout(Duration::from_secs(2), stream.read(&mut chunk))
            .await
            .expect("response head within deadline")
            .expect("read succeeds");
        assert!(n > 0, "connection closed before a full response head");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8(buf[..head_end].to_vec()).unwrap();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let status: u16 = status_line.split(' ').nth(1).unwrap().parse().unwrap();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_lowercase(), value.trim().to_string());
        }
    }

    let content_length: usize = headers
        .get("content-length")
        .map(|v| v.parse().unwrap())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < content_length {
        let n = timeout(Duration::from_secs(2), stream.read(&mut chunk))
            .await
            .expect("response body within deadline")
            .expect("read succeeds");
        assert!(n > 0, "connection closed before a full response body");
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    (status, headers, String::from_utf8(body).unwrap())
}

#[tokio::test]
async fn test_preflight_and_keep_alive_on_one_connection() {
    let addr = spawn_server(test_state().await).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // CORS preflight.
    stream
        .write_all(
            b"OPTIONS /annotation HTTP/1.1\r\nOrigin: https://example.org\r\n\r\n",
        )
        .await
        .unwrap();
    let (status, headers, body) = read_response(&mut stream).await;
    assert_eq!(status, 204);
    assert!(body.is_empty());
    assert_eq!(
        headers.get("access-control-allow-origin").map(String::as_str),
        Some("https://example.org")
    );
    assert_eq!(
        headers.get("access-control-allow-credentials").map(String::as_str),
        Some("true")
    );

    // Same connection is still usable: keep-alive survived the preflight.
    stream
        .write_all(b"GET /nonexistent HTTP/1.1\r\nOrigin: https://example.org\r\n\r\n")
        .await
        .unwrap();
    let (status, headers, body) = read_response(&mut stream).await;
    assert_eq!(status, 404);
    assert_eq!(headers.get("connection").map(String::as_str), Some("keep-alive"));
    let envelope: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(envelope["status"], "error");
}

#[tokio::test]
async fn test_protected_endpoint_without_cookie_is_unauthorized() {
    let addr = spawn_server(test_state().await).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET /user HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let (status, _, body) = read_response(&mut stream).await;
    assert_eq!(status, 401);
    let envelope: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(envelope["status"], "error");
}

#[tokio::test]
async fn test_forged_cookie_is_unauthorized() {
    let addr = spawn_server(test_state().await).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // 32+64 hex chars in the right shape, but signed with the wrong secret.
    let forged = glossd::core::auth::mint_token("not-the-server-secret");
    let request = format!("GET /user HTTP/1.1\r\nCookie: sessionId={forged}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let (status, _, _) = read_response(&mut stream).await;
    assert_eq!(status, 401);
}

#[tokio::test]
async fn test_http10_request_closes_connection_after_response() {
    let addr = spawn_server(test_state().await).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream
        .write_all(b"GET /nonexistent HTTP/1.0\r\n\r\n")
        .await
        .unwrap();
    let (status, headers, _) = read_response(&mut stream).await;
    assert_eq!(status, 404);
    assert_eq!(headers.get("connection").map(String::as_str), Some("close"));

    // The server closes; the next read returns EOF.
    let mut rest = Vec::new();
    let n = timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .expect("EOF within deadline")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn test_silent_client_is_closed_at_read_deadline() {
    let state = test_state().await;
    let addr = spawn_server(state.clone()).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    // Send nothing at all. The session must force-close at the read
    // deadline rather than waiting on the peer.
    let started = Instant::now();
    let mut buf = Vec::new();
    let n = timeout(READ_TIMEOUT * 10, stream.read_to_end(&mut buf))
        .await
        .expect("server must close the socket at the read deadline")
        .unwrap();
    assert_eq!(n, 0, "no response bytes are owed to a silent client");
    assert!(started.elapsed() >= READ_TIMEOUT);

    // All per-session resources are released: the client map drains once
    // the session task finishes.
    timeout(Duration::from_secs(2), async {
        while !state.clients.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("session cleanup must remove the client entry");
}

#[tokio::test]
async fn test_half_request_then_silence_also_times_out() {
    let state = test_state().await;
    let addr = spawn_server(state).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    stream.write_all(b"GET /user HT").await.unwrap();

    let mut buf = Vec::new();
    let n = timeout(READ_TIMEOUT * 10, stream.read_to_end(&mut buf))
        .await
        .expect("server must close the socket at the read deadline")
        .unwrap();
    assert_eq!(n, 0);
}

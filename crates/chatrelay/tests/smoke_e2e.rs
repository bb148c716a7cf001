//! End-to-end smoke tests for the chat relay
//!
//! These tests walk through real user workflows:
//! - Fetching a token over HTTP and joining the relay with it
//! - Group broadcast across several members
//! - Token expiry while connected
//! - User info lookup and error texts
//! - Keepalive and oversized frames

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chat_common::wire::{
    split_relayed_line, NO_MATCHING_CREDENTIALS, TOKEN_INVALID_DIAGNOSTIC, UNKNOWN_USER,
};
use chatrelay::auth::{Issuer, UserDirectory};
use chatrelay::config::RelayMode;
use chatrelay::http::router;
use chatrelay::metrics::HealthState;
use common::*;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

fn issuer_for(server: &TestServer, ttl: u64) -> Arc<Issuer> {
    Arc::new(Issuer::new(
        UserDirectory::default(),
        server.keys.clone(),
        ttl,
    ))
}

async fn http_get(app: axum::Router, uri: &str) -> (StatusCode, String) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), 64 * 1024)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

/// Test Suite 1: Login then chat
#[tokio::test]
async fn smoke_test_01_login_then_chat() {
    let server = start_server(RelayMode::Authenticated).await;
    let app = router(issuer_for(&server, 900), HealthState::new());

    let (status, token_a) =
        http_get(app.clone(), "/auth?username=maxcarrion31&password=1234").await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(token_a, NO_MATCHING_CREDENTIALS);
    let (_, token_b) = http_get(app, "/auth?username=maxcarrion32&password=1234").await;

    let mut a = TestClient::connect(&server, &token_a).await;
    let mut b = TestClient::connect(&server, &token_b).await;
    server.wait_for_registered(2).await;

    a.send_text("hi B").await;
    let line = b.recv_text().await;
    assert_eq!(split_relayed_line(&line), Some(("maxcarrion31", "hi B")));

    b.send_text("hi A").await;
    assert_eq!(b.recv_text().await, "maxcarrion32: hi A");
    assert_eq!(a.recv_text().await, "maxcarrion31: hi B");
    assert_eq!(a.recv_text().await, "maxcarrion32: hi A");

    println!("✓ Test 1: Token from /auth admits and relays");
}

/// Test Suite 2: Bad credentials
#[tokio::test]
async fn smoke_test_02_bad_credentials() {
    let server = start_server(RelayMode::Authenticated).await;
    let app = router(issuer_for(&server, 900), HealthState::new());

    let (status, body) = http_get(app.clone(), "/auth?username=maxcarrion31&password=nope").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, NO_MATCHING_CREDENTIALS);

    let (_, body) = http_get(app, "/auth").await;
    assert_eq!(body, NO_MATCHING_CREDENTIALS);

    let mut client = TestClient::connect(&server, &body).await;
    assert!(client.expect_closed().await.is_empty());

    println!("✓ Test 2: Bad credentials yield no usable token");
}

/// Test Suite 3: User info
#[tokio::test]
async fn smoke_test_03_user_info() {
    let server = start_server(RelayMode::Authenticated).await;
    let app = router(issuer_for(&server, 900), HealthState::new());

    let (_, token) = http_get(app.clone(), "/auth?username=userC&password=passwordC").await;
    let (_, info) = http_get(app.clone(), &format!("/userInfo?token={token}")).await;
    assert_eq!(info, "I am userC.");

    let (_, info) = http_get(app.clone(), "/userInfo?token=garbage").await;
    assert_eq!(info, "Error: malformed token");

    let stranger = server.keys.issue("99", "ghost", 900).unwrap();
    let (_, info) = http_get(app, &format!("/userInfo?token={stranger}")).await;
    assert_eq!(info, UNKNOWN_USER);

    println!("✓ Test 3: User info lookup works");
}

/// Test Suite 4: Group broadcast
#[tokio::test]
async fn smoke_test_04_group_broadcast() {
    let server = start_server(RelayMode::Authenticated).await;

    let member_count = 8;
    let mut clients = Vec::new();
    for i in 0..member_count {
        let token = server.token_for(&i.to_string(), &format!("user{i}"));
        clients.push(TestClient::connect(&server, &token).await);
    }
    server.wait_for_registered(member_count).await;

    for (i, client) in clients.iter_mut().enumerate() {
        client.send_text(&format!("from {i}")).await;
    }

    for client in clients.iter_mut() {
        let mut seen = Vec::new();
        for _ in 0..member_count {
            seen.push(client.recv_text().await);
        }
        seen.sort();
        let mut expected: Vec<String> = (0..member_count)
            .map(|i| format!("user{i}: from {i}"))
            .collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    println!("✓ Test 4: {member_count}-member broadcast reaches everyone");
}

/// Test Suite 5: Session outlives its token
#[tokio::test]
async fn smoke_test_05_token_expires_mid_session() {
    let server = start_server(RelayMode::Authenticated).await;
    let app = router(issuer_for(&server, 2), HealthState::new());

    let (_, short) = http_get(app, "/auth?username=maxcarrion32&password=1234").await;
    let mut talker = TestClient::connect(&server, &server.token_for("1", "maxcarrion31")).await;
    let mut listener = TestClient::connect(&server, &short).await;
    server.wait_for_registered(2).await;

    talker.send_text("before").await;
    assert_eq!(listener.recv_text().await, "maxcarrion31: before");
    assert_eq!(talker.recv_text().await, "maxcarrion31: before");

    sleep(Duration::from_millis(3100)).await;

    talker.send_text("after").await;
    assert_eq!(talker.recv_text().await, "maxcarrion31: after");
    assert_eq!(
        listener.expect_closed().await,
        vec![TOKEN_INVALID_DIAGNOSTIC.to_string()]
    );
    server.wait_for_registered(1).await;

    println!("✓ Test 5: Expired member receives one diagnostic and is dropped");
}

/// Test Suite 6: Keepalive
#[tokio::test]
async fn smoke_test_06_ping_pong() {
    let server = start_server(RelayMode::Authenticated).await;
    let mut client = TestClient::connect(&server, &server.token_for("1", "a")).await;

    client
        .ws_tx
        .send(Message::Ping(b"keepalive".to_vec()))
        .await
        .unwrap();

    let pong = timeout(Duration::from_secs(5), async {
        while let Some(msg) = client.ws_rx.next().await {
            if let Ok(Message::Pong(data)) = msg {
                return Some(data);
            }
        }
        None
    })
    .await
    .expect("timeout waiting for pong");
    assert_eq!(pong.as_deref(), Some(&b"keepalive"[..]));

    println!("✓ Test 6: Ping/pong keepalive works");
}

/// Test Suite 7: Oversized frames
#[tokio::test]
async fn smoke_test_07_oversized_frame_closes_sender() {
    let mut config = test_config("127.0.0.1:0".parse().unwrap(), RelayMode::Authenticated);
    config.max_payload = 512;
    let server = start_server_with_config(config).await;

    let mut big = TestClient::connect(&server, &server.token_for("1", "big")).await;
    let mut other = TestClient::connect(&server, &server.token_for("2", "other")).await;
    server.wait_for_registered(2).await;

    big.send_text(&"x".repeat(1024)).await;
    big.expect_closed().await;
    server.wait_for_registered(1).await;

    assert_eq!(
        other.recv_text_timeout(Duration::from_millis(300)).await,
        None
    );

    println!("✓ Test 7: Oversized frames are not relayed");
}

/// Test Suite 8: Binary frames carrying text
#[tokio::test]
async fn smoke_test_08_utf8_binary_frame_is_relayed() {
    let server = start_server(RelayMode::Authenticated).await;
    let mut a = TestClient::connect(&server, &server.token_for("1", "a")).await;
    server.wait_for_registered(1).await;

    a.ws_tx
        .send(Message::Binary("héllo".as_bytes().to_vec()))
        .await
        .unwrap();
    assert_eq!(a.recv_text().await, "a: héllo");

    println!("✓ Test 8: UTF-8 binary frames are relayed as text");
}

/// Test Suite 9: Non-UTF-8 binary frames
#[tokio::test]
async fn smoke_test_09_invalid_utf8_binary_is_dropped() {
    let server = start_server(RelayMode::Authenticated).await;
    let mut a = TestClient::connect(&server, &server.token_for("1", "a")).await;
    let mut b = TestClient::connect(&server, &server.token_for("2", "b")).await;
    server.wait_for_registered(2).await;

    a.ws_tx
        .send(Message::Binary(vec![0xff, 0xfe, 0xfd]))
        .await
        .unwrap();

    assert_eq!(b.recv_text_timeout(Duration::from_millis(300)).await, None);
    assert_eq!(a.recv_text_timeout(Duration::from_millis(300)).await, None);
    assert_eq!(server.state.registry.len(), 2);

    a.send_text("still connected").await;
    assert_eq!(b.recv_text().await, "a: still connected");

    println!("✓ Test 9: Non-UTF-8 binary frames are dropped, sender stays");
}

/// Test Suite 10: Open relay
#[tokio::test]
async fn smoke_test_10_open_relay_chat() {
    let server = start_server(RelayMode::Open).await;

    let mut a = TestClient::connect_open(&server).await;
    let mut b = TestClient::connect_open(&server).await;
    server.wait_for_registered(2).await;

    a.send_text(r#"{"message":"yo","username":"A","timestamp":"1"}"#)
        .await;
    assert_eq!(
        b.recv_text().await,
        r#"{"message":"yo","username":"A","timestamp":"1"}"#
    );

    b.send_text("not json at all").await;
    assert_eq!(a.recv_text().await, "not json at all");

    println!("✓ Test 10: Open relay passes payloads through");
}

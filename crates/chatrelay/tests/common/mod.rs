#![allow(dead_code)]

use chat_common::TokenKeys;
use chatrelay::config::{RelayMode, ServerConfig};
use chatrelay::server::ServerState;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

pub const SECRET: &[u8] = b"integration-test-secret";

pub fn test_config(listen: SocketAddr, mode: RelayMode) -> ServerConfig {
    ServerConfig {
        listen,
        http_addr: "127.0.0.1:0".parse().unwrap(),
        mode,
        token_ttl: 900,
        max_conns: 1000,
        max_payload: 65_536,
        outbound_buffer: 256,
        ping_interval: 30,
        idle_timeout: 120,
        admit_timeout: 5,
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<ServerState>,
    pub keys: TokenKeys,
    pub shutdown_tx: watch::Sender<()>,
}

impl TestServer {
    pub fn url(&self, query: &str) -> String {
        format!("ws://{}/ws{}", self.addr, query)
    }

    pub fn token_for(&self, sub: &str, username: &str) -> String {
        self.keys.issue(sub, username, 900).unwrap()
    }

    /// Wait until exactly `n` connections are registered.
    pub async fn wait_for_registered(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.state.registry.len() != n {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| {
            panic!(
                "expected {n} registered connections, have {}",
                self.state.registry.len()
            )
        });
    }
}

pub async fn start_server_with_config(config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind(config.listen).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let keys = TokenKeys::new(SECRET);
    let mut config = config;
    config.listen = addr;
    let state = Arc::new(ServerState::new(config, keys.clone()));
    let (shutdown_tx, shutdown_rx) = watch::channel(());

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = chatrelay::run_with_shutdown(listener, state_clone, shutdown_rx).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        addr,
        state,
        keys,
        shutdown_tx,
    }
}

pub async fn start_server(mode: RelayMode) -> TestServer {
    start_server_with_config(test_config("127.0.0.1:0".parse().unwrap(), mode)).await
}

pub struct TestClient {
    pub ws_tx: futures_util::stream::SplitSink<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
        Message,
    >,
    pub ws_rx: futures_util::stream::SplitStream<
        tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    >,
}

impl TestClient {
    pub async fn connect_url(url: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        let (ws_tx, ws_rx) = ws.split();
        Self { ws_tx, ws_rx }
    }

    pub async fn connect(server: &TestServer, token: &str) -> Self {
        Self::connect_url(&server.url(&format!("?token={token}"))).await
    }

    pub async fn connect_open(server: &TestServer) -> Self {
        Self::connect_url(&server.url("")).await
    }

    pub async fn send_text(&mut self, text: &str) {
        self.ws_tx
            .send(Message::Text(text.to_string()))
            .await
            .unwrap();
    }

    /// Next text frame, skipping keepalives. Panics on close or timeout.
    pub async fn recv_text(&mut self) -> String {
        self.recv_text_timeout(Duration::from_secs(5))
            .await
            .expect("timeout or close waiting for text")
    }

    pub async fn recv_text_timeout(&mut self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, async {
            while let Some(msg) = self.ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => return Some(text),
                    Ok(Message::Ping(_) | Message::Pong(_)) => {}
                    Ok(_) | Err(_) => return None,
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Read until the server closes the connection, collecting any text.
    pub async fn expect_closed(&mut self) -> Vec<String> {
        let mut texts = Vec::new();
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(msg) = self.ws_rx.next().await {
                match msg {
                    Ok(Message::Text(text)) => texts.push(text),
                    Ok(Message::Close(_)) | Err(_) => return,
                    Ok(_) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "connection was not closed by the server");
        texts
    }
}

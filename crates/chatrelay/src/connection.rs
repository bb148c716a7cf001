use crate::admission::admit;
use crate::config::RelayMode;
use crate::error::RelayError;
use crate::metrics::{counters, gauges};
use crate::registry::{next_conn_id, open_key, ConnHandle, Mailbox};
use crate::relay::Sender;
use crate::server::ServerState;
use chat_common::wire::RELAY_PATH;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::net::TcpStream;
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsRecv = SplitStream<WebSocketStream<TcpStream>>;

/// Releases a connection's registry slot and gauge when its task ends.
struct ConnGuard {
    state: Arc<ServerState>,
    key: String,
    id: u64,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        // A successor holding the same key keeps its slot.
        self.state.registry.remove_if(&self.key, self.id);
        gauges::dec_connections_active();
    }
}

/// Refuse upgrades on any path other than the relay path, and capture the
/// query string of the ones we accept.
fn check_upgrade(
    req: &Request,
    resp: Response,
    query_cell: &OnceLock<Option<String>>,
) -> Result<Response, ErrorResponse> {
    if req.uri().path() != RELAY_PATH {
        let mut err = ErrorResponse::new(Some("not found".to_string()));
        *err.status_mut() = StatusCode::NOT_FOUND;
        return Err(err);
    }
    let _ = query_cell.set(req.uri().query().map(str::to_string));
    Ok(resp)
}

/// Drive one admitted connection until it closes, is evicted, or is displaced.
async fn run_message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    mailbox: &mut Mailbox,
    state: &ServerState,
    sender: Sender<'_>,
) -> Result<(), RelayError> {
    let mut ping_interval = interval(Duration::from_secs(state.config.ping_interval));
    let idle_timeout = Duration::from_secs(state.config.idle_timeout);
    let mut last_activity = Instant::now();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let _ = state.relay.on_message(sender, &text);
                    }
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                        Ok(text) => {
                            let _ = state.relay.on_message(sender, &text);
                        }
                        Err(_) => debug!(conn = sender.id, "dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            debug!("failed to send pong: {}", e);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Err(e)) => return Err(RelayError::WebSocket(e)),
                    _ => {}
                }
            }
            line = mailbox.lines.recv() => {
                last_activity = Instant::now();
                match line {
                    Some(line) => {
                        ws_tx
                            .send(Message::Text(line))
                            .await
                            .map_err(|_| RelayError::TransportClosed)?;
                    }
                    None => {
                        // Eviction queues the diagnostic before dropping the entry.
                        if let Ok(diagnostic) = mailbox.terminate.try_recv() {
                            debug!(conn = sender.id, "token no longer valid, closing");
                            let _ = ws_tx.send(Message::Text(diagnostic)).await;
                        } else {
                            debug!(conn = sender.id, "session displaced by a newer connection");
                        }
                        let _ = ws_tx.send(Message::Close(None)).await;
                        return Ok(());
                    }
                }
            }
            diagnostic = mailbox.terminate.recv() => {
                if let Some(diagnostic) = diagnostic {
                    debug!(conn = sender.id, "token no longer valid, closing");
                    let _ = ws_tx.send(Message::Text(diagnostic)).await;
                }
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
            _ = ping_interval.tick() => {
                if last_activity.elapsed() >= idle_timeout {
                    debug!(conn = sender.id, "idle timeout reached, closing connection");
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(());
                }
                if let Err(e) = ws_tx.send(Message::Ping(vec![])).await {
                    debug!("failed to send ping: {}", e);
                }
            }
        }
    }
}

/// Handshake, admit, register, and relay for one accepted TCP stream.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), RelayError> {
    let ws_config = WebSocketConfig {
        max_message_size: Some(state.config.max_payload),
        max_frame_size: Some(state.config.max_payload),
        ..WebSocketConfig::default()
    };

    let query_cell = Arc::new(OnceLock::new());
    let cell = query_cell.clone();
    let ws_stream = timeout(
        Duration::from_secs(state.config.admit_timeout),
        tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            move |req: &Request, resp: Response| check_upgrade(req, resp, &cell),
            Some(ws_config),
        ),
    )
    .await
    .map_err(|_| {
        counters::admissions_total("timeout");
        RelayError::AdmitTimeout
    })?
    .map_err(RelayError::WebSocket)?;

    let query = query_cell.get().cloned().flatten();
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let id = next_conn_id();
    let (key, display_name) = match state.config.mode {
        RelayMode::Authenticated => match admit(&state.keys, query.as_deref()) {
            Ok(admitted) => {
                counters::admissions_total("admitted");
                (admitted.key, admitted.claims.username)
            }
            Err(reason) => {
                counters::admissions_total(reason.as_str());
                debug!(peer = %peer_addr, reason = reason.as_str(), "rejecting connection");
                // Silent rejection: a bare close, no diagnostic text.
                let _ = ws_tx.send(Message::Close(None)).await;
                return Err(RelayError::Token(reason));
            }
        },
        RelayMode::Open => {
            counters::admissions_total("open");
            (open_key(id), String::new())
        }
    };

    let (handle, mut mailbox) = ConnHandle::channel(id, state.config.outbound_buffer);

    if let Some(displaced) = state.registry.register(key.clone(), handle) {
        debug!(
            conn = id,
            displaced = displaced.id,
            "token reused, closing previous session"
        );
        drop(displaced);
    }

    gauges::inc_connections_active();
    let _guard = ConnGuard {
        state: state.clone(),
        key,
        id,
    };

    info!(conn = id, peer = %peer_addr, user = %display_name, "client connected");

    let result = run_message_loop(
        &mut ws_tx,
        &mut ws_rx,
        &mut mailbox,
        &state,
        Sender {
            id,
            display_name: &display_name,
        },
    )
    .await;

    info!(conn = id, user = %display_name, "client disconnected");
    result
}

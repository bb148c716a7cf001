use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::RelayError;
use crate::registry::ConnectionRegistry;
use crate::relay::Relay;
use chat_common::token::TokenKeys;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for connection tasks to finish closing.
const DRAIN_TIMEOUT_SECS: u64 = 30;

/// Shared state for the relay server.
pub struct ServerState {
    /// Live connections, keyed by token (authenticated) or connection id (open).
    pub registry: Arc<ConnectionRegistry>,
    /// Fan-out over `registry`.
    pub relay: Relay,
    /// Keys used for admission and re-verification.
    pub keys: TokenKeys,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Accepted sockets currently open, counted from accept so that
    /// handshakes in flight hold a slot against `max_conns`.
    pub active_connections: AtomicUsize,
}

impl ServerState {
    /// Build state with an empty registry and a relay in `config.mode`.
    #[must_use]
    pub fn new(config: ServerConfig, keys: TokenKeys) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Relay::new(registry.clone(), keys.clone(), config.mode);
        Self {
            registry,
            relay,
            keys,
            config,
            active_connections: AtomicUsize::new(0),
        }
    }
}

/// One accepted socket's claim on `max_conns`, released on drop.
struct ConnectionSlot(Arc<ServerState>);

impl ConnectionSlot {
    /// Claim a slot, or `None` when the server is full.
    fn try_claim(state: &Arc<ServerState>) -> Option<Self> {
        let claimed = state
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < state.config.max_conns).then_some(n + 1)
            })
            .is_ok();
        claimed.then(|| Self(Arc::clone(state)))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Run the accept loop with no external shutdown signal.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), RelayError> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    run_with_shutdown(listener, state, shutdown_rx).await
}

/// Run the server accept loop with an externally-controlled shutdown signal.
///
/// When `shutdown_rx` observes a value (or its sender is dropped) the loop
/// stops accepting, closes every registered connection, and waits for the
/// connection tasks to finish.
///
/// # Errors
///
/// Returns an error if the listener's local address cannot be read.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), RelayError> {
    let local_addr = listener.local_addr().map_err(RelayError::Io)?;
    info!("relay listening on {} ({:?} mode)", local_addr, state.config.mode);
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let Some(slot) = ConnectionSlot::try_claim(&state) else {
                            warn!("max connections reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        };
                        let state = Arc::clone(&state);
                        tasks.spawn(async move {
                            let _slot = slot;
                            if let Err(e) = handle_connection(stream, addr, state).await {
                                debug!("connection from {} closed: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, closing {} connections", state.registry.len());
                break;
            }
        }
    }

    // Dropping every handle closes each connection's channel; its task then
    // sends a close frame and exits.
    state.registry.clear();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(DRAIN_TIMEOUT_SECS);
    while !tasks.is_empty() {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(_) => {}
            Err(_) => {
                warn!(
                    "drain timeout reached with {} connections still active",
                    tasks.len()
                );
                tasks.abort_all();
                break;
            }
        }
    }

    info!("server shut down gracefully");
    Ok(())
}

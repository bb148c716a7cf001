use chat_common::InvalidReason;
use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The presented token failed verification.
    #[error("token rejected: {0}")]
    Token(#[from] InvalidReason),
    /// The WebSocket handshake did not finish within the admission window.
    #[error("admission timed out")]
    AdmitTimeout,
    /// Send or receive on a connection that is already gone.
    #[error("transport closed")]
    TransportClosed,
    /// A single fan-out recipient could not be reached.
    #[error("recipient {0} unreachable")]
    RecipientUnreachable(u64),
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

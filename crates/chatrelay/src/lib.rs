//! Chat relay server: token-gated WebSocket broadcast.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Token extraction and verification at connect time.
pub mod admission;
/// Username/password lookup and token issuance.
pub mod auth;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Error types for relay server operations.
pub mod error;
/// HTTP side service: auth, health, and metrics endpoints.
pub mod http;
/// Prometheus metrics helpers and readiness state.
pub mod metrics;
/// Concurrent table of live connections.
pub mod registry;
/// Fan-out of inbound messages to registered connections.
pub mod relay;
/// Token signing secret loading.
pub mod secret;
/// Accept loop and shared server state.
pub mod server;

pub use server::{run, run_with_shutdown, ServerState};

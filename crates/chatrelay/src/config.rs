use chat_common::wire::DEFAULT_TOKEN_TTL_SECS;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Which relay state machine the server runs.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Token-gated admission, re-verification on every broadcast, and
    /// `"<name>: <payload>"` lines delivered to everyone including the sender.
    Authenticated,
    /// No admission check; payloads pass through verbatim to everyone but
    /// the sender.
    Open,
}

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "chatrelay")]
#[command(about = "Real-time chat broadcast relay")]
#[command(version)]
pub struct Args {
    /// Socket address the WebSocket relay listens on.
    #[arg(long, default_value = "0.0.0.0:5000", env = "CHATRELAY_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the HTTP side service (auth, health, metrics).
    #[arg(long, default_value = "0.0.0.0:8080", env = "CHATRELAY_HTTP")]
    pub http_addr: SocketAddr,
    /// Relay mode.
    #[arg(long, value_enum, default_value = "authenticated", env = "CHATRELAY_MODE")]
    pub mode: RelayMode,
    /// Token signing secret. Prefer `--secret-file` outside development.
    #[arg(long, env = "CHATRELAY_SECRET", hide_env_values = true)]
    pub secret: Option<String>,
    /// Path to a file holding the token signing secret.
    #[arg(long, env = "CHATRELAY_SECRET_FILE", conflicts_with = "secret")]
    pub secret_file: Option<PathBuf>,
    /// Path to a JSON user directory replacing the built-in lab users.
    #[arg(long, env = "CHATRELAY_USERS")]
    pub users: Option<PathBuf>,
    /// Lifetime of issued tokens in seconds.
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECS, env = "CHATRELAY_TOKEN_TTL")]
    pub token_ttl: u64,
    /// Maximum total concurrent connections.
    #[arg(long, default_value = "10000", env = "CHATRELAY_MAX_CONNS")]
    pub max_conns: usize,
    /// Maximum inbound WebSocket message size in bytes.
    #[arg(long, default_value = "65536", env = "CHATRELAY_MAX_PAYLOAD")]
    pub max_payload: usize,
    /// Per-connection outbound queue depth.
    #[arg(long, default_value = "256", env = "CHATRELAY_OUTBOUND_BUFFER")]
    pub outbound_buffer: usize,
    /// Interval between WebSocket pings in seconds.
    #[arg(long, default_value = "30", env = "CHATRELAY_PING_INTERVAL")]
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    #[arg(long, default_value = "120", env = "CHATRELAY_IDLE_TIMEOUT")]
    pub idle_timeout: u64,
    /// Seconds a new socket may take to finish the WebSocket handshake.
    #[arg(long, default_value = "5", env = "CHATRELAY_ADMIT_TIMEOUT")]
    pub admit_timeout: u64,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the WebSocket relay listens on.
    pub listen: SocketAddr,
    /// Socket address for the HTTP side service.
    pub http_addr: SocketAddr,
    /// Relay mode.
    pub mode: RelayMode,
    /// Lifetime of issued tokens in seconds.
    pub token_ttl: u64,
    /// Maximum total concurrent connections.
    pub max_conns: usize,
    /// Maximum inbound WebSocket message size in bytes.
    pub max_payload: usize,
    /// Per-connection outbound queue depth.
    pub outbound_buffer: usize,
    /// Interval between WebSocket pings in seconds.
    pub ping_interval: u64,
    /// Connection idle timeout in seconds.
    pub idle_timeout: u64,
    /// Seconds a new socket may take to finish the WebSocket handshake.
    pub admit_timeout: u64,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    /// Returns Ok(()) if valid, Err with description otherwise.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 1_000_000 {
            return Err("max_conns exceeds reasonable limit (1,000,000)".to_string());
        }

        if self.token_ttl == 0 {
            return Err("token_ttl must be greater than 0".to_string());
        }
        if self.token_ttl > 86_400 {
            return Err("token_ttl exceeds reasonable limit (86400 seconds / 1 day)".to_string());
        }

        const MAX_ALLOWED_PAYLOAD: usize = 16 * 1024 * 1024;
        if self.max_payload == 0 {
            return Err("max_payload must be greater than 0".to_string());
        }
        if self.max_payload > MAX_ALLOWED_PAYLOAD {
            return Err(format!(
                "max_payload exceeds maximum allowed ({} bytes)",
                MAX_ALLOWED_PAYLOAD
            ));
        }

        if self.outbound_buffer == 0 {
            return Err("outbound_buffer must be greater than 0".to_string());
        }
        if self.outbound_buffer > 65_536 {
            return Err("outbound_buffer exceeds reasonable limit (65536)".to_string());
        }

        if self.ping_interval == 0 {
            return Err("ping_interval must be greater than 0".to_string());
        }
        if self.ping_interval > 3600 {
            return Err("ping_interval exceeds reasonable limit (3600 seconds)".to_string());
        }

        if self.idle_timeout == 0 {
            return Err("idle_timeout must be greater than 0".to_string());
        }
        if self.idle_timeout > 86_400 {
            return Err(
                "idle_timeout exceeds reasonable limit (86400 seconds / 1 day)".to_string(),
            );
        }
        if self.idle_timeout < self.ping_interval {
            return Err("idle_timeout cannot be shorter than ping_interval".to_string());
        }

        if self.admit_timeout == 0 {
            return Err("admit_timeout must be greater than 0".to_string());
        }
        if self.admit_timeout > 300 {
            return Err("admit_timeout exceeds reasonable limit (300 seconds)".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            http_addr: args.http_addr,
            mode: args.mode,
            token_ttl: args.token_ttl,
            max_conns: args.max_conns,
            max_payload: args.max_payload,
            outbound_buffer: args.outbound_buffer,
            ping_interval: args.ping_interval,
            idle_timeout: args.idle_timeout,
            admit_timeout: args.admit_timeout,
        }
    }
}

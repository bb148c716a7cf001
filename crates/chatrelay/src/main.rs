#![forbid(unsafe_code)]

use anyhow::Result;
use chat_common::TokenKeys;
use chatrelay::auth::{Issuer, UserDirectory};
use chatrelay::config::{Args, ServerConfig};
use chatrelay::http::start_http_server;
use chatrelay::metrics::HealthState;
use chatrelay::run_with_shutdown;
use chatrelay::secret::resolve_secret;
use chatrelay::server::ServerState;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config: ServerConfig = args.clone().into();

    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let secret = resolve_secret(args.secret.as_deref(), args.secret_file.as_deref())?;
    let keys = TokenKeys::new(&secret);

    let directory = match args.users {
        Some(ref path) => UserDirectory::load(path)?,
        None => UserDirectory::default(),
    };
    info!("user directory has {} accounts", directory.len());

    let issuer = Arc::new(Issuer::new(directory, keys.clone(), config.token_ttl));
    let state = Arc::new(ServerState::new(config.clone(), keys));

    let listener = TcpListener::bind(config.listen).await?;
    info!("bound to {}", config.listen);

    let health_state = HealthState::new();

    tokio::spawn({
        let health_state = health_state.clone();
        async move {
            if let Err(e) = start_http_server(config.http_addr, issuer, health_state).await {
                warn!("http server error: {}", e);
            }
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(());

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received shutdown signal");
                health_state.set_ready(false);
                let _ = shutdown_tx.send(());
            }
            Err(e) => {
                warn!("cannot listen for shutdown signal: {}", e);
                // Keep the sender alive so the relay is not stopped.
                std::future::pending::<()>().await;
                drop(shutdown_tx);
            }
        }
    });

    if let Err(e) = run_with_shutdown(listener, state, shutdown_rx).await {
        error!("server error: {}", e);
    }

    Ok(())
}

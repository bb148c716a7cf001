use crate::auth::Issuer;
use crate::metrics::HealthState;
use axum::extract::{Query, State};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness check response.
#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    ready: bool,
}

#[derive(Deserialize)]
struct AuthQuery {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: String,
}

/// Routes for token issuance, user info, health and readiness.
pub fn router(issuer: Arc<Issuer>, health_state: HealthState) -> Router {
    Router::new()
        .route("/auth", get(auth_handler))
        .route("/userInfo", get(user_info_handler))
        .with_state(issuer)
        .route("/health", get(health_handler))
        .route("/ready", get(move || ready_handler(health_state.clone())))
}

/// Serve [`router`] plus a Prometheus `/metrics` endpoint on `addr`.
///
/// # Errors
///
/// Returns an error if the metrics recorder cannot be installed or binding
/// the HTTP listener fails.
pub async fn start_http_server(
    addr: SocketAddr,
    issuer: Arc<Issuer>,
    health_state: HealthState,
) -> anyhow::Result<()> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let app = router(issuer, health_state).route(
        "/metrics",
        get(move || {
            let h = handle.clone();
            async move { h.render() }
        }),
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("http server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

/// `GET /auth?username=&password=`: token or error text.
async fn auth_handler(State(issuer): State<Arc<Issuer>>, Query(q): Query<AuthQuery>) -> String {
    issuer.fetch_user_token(&q.username, &q.password)
}

/// `GET /userInfo?token=`: profile text or error text.
async fn user_info_handler(
    State(issuer): State<Arc<Issuer>>,
    Query(q): Query<TokenQuery>,
) -> String {
    issuer.fetch_user_info(&q.token)
}

/// Health check handler - returns 200 if server is running.
async fn health_handler() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "healthy" }))
}

/// Readiness check handler - returns 200 if ready, 503 if not.
async fn ready_handler(state: HealthState) -> (StatusCode, Json<ReadyResponse>) {
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadyResponse {
                status: "ready",
                ready: true,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadyResponse {
                status: "not ready",
                ready: false,
            }),
        )
    }
}

//! # HTTP Server
//!
//! Serves the operator's probe and metrics endpoints on `METRICS_PORT`
//! (default 8080):
//!
//! - `/metrics` - Prometheus text exposition of the operator registry
//! - `/healthz` - liveness, 200 while the process serves requests
//! - `/readyz` - 200 once the provider ConfigMap cache has synced, 503 before
//!   that and again after a shutdown signal

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::TextEncoder;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Readiness shared between the watch loop and the probe handlers
#[derive(Debug, Default)]
pub struct ServerState {
    ready: AtomicBool,
}

impl ServerState {
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    /// The watch loop is serving reconciles
    pub fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::Relaxed) {
            info!("operator ready");
        }
    }

    /// Shutdown has started
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::Relaxed);
    }
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let families = crate::observability::metrics::REGISTRY.gather();
    match TextEncoder::new().encode_to_string(&families) {
        Ok(body) => (StatusCode::OK, [("content-type", METRICS_CONTENT_TYPE)], body),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("failed to encode metrics: {e}"),
            )
        }
    }
}

async fn healthz_handler() -> StatusCode {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> StatusCode {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_ready_until_marked() {
        let state = Arc::new(ServerState::default());
        assert!(!state.is_ready());
        assert_eq!(
            readyz_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.mark_ready();
        assert_eq!(readyz_handler(State(state)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_shutdown_clears_readiness() {
        let state = Arc::new(ServerState::default());
        state.mark_ready();
        state.mark_not_ready();
        assert_eq!(
            readyz_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(healthz_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_handler_serves_text_format() {
        crate::observability::metrics::increment_reconciliations();
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"],
            METRICS_CONTENT_TYPE
        );
    }
}

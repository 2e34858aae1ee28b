//! Liveness, readiness and Prometheus scrape endpoints
//!
//! Served on a separate port from the gRPC listener:
//! - `GET /healthz` - process is up
//! - `GET /readyz` - process is up (the gRPC `Health` call reports pack readiness)
//! - `GET /metrics` - Prometheus text exposition
//!
//! Everything else is a 404.

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use crate::metrics;

pub fn create_router() -> Router {
    Router::new()
        .route("/healthz", get(ok))
        .route("/readyz", get(ok))
        .route("/metrics", get(scrape))
        .fallback(not_found)
}

async fn ok() -> &'static str {
    "ok"
}

async fn scrape() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode_text(),
    )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

/// Serve the health router until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Health server listening");
    axum::serve(listener, create_router())
        .with_graceful_shutdown(shutdown)
        .await
}

//! Metrics endpoint
//!
//! Serves `GET /metrics` and nothing else.

use crate::error::ServiceResult;
use crate::metrics::PrometheusSink;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Router exposing `sink` at `/metrics`
pub fn router(sink: Arc<PrometheusSink>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(sink)
}

async fn metrics(State(sink): State<Arc<PrometheusSink>>) -> Response {
    match sink.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            warn!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve the metrics endpoint on `listener` until `shutdown` fires
pub async fn serve(
    listener: TcpListener,
    sink: Arc<PrometheusSink>,
    shutdown: CancellationToken,
) -> ServiceResult<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("serving metrics on http://{}/metrics", addr);
    }

    axum::serve(listener, router(sink))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

//! Liveness endpoint.

use std::future::Future;
use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tracing::info;

use crate::config::DRIVER_VERSION;
use crate::error::Result;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: &'static str,
    /// Daemon version.
    pub version: &'static str,
}

/// Health check handler.
///
/// ```text
/// GET /healthz
///
/// Response: 200 OK
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn healthz() -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy",
        version: DRIVER_VERSION,
    };

    (StatusCode::OK, Json(response))
}

/// Router serving `/healthz`.
pub fn router() -> Router {
    Router::new().route("/healthz", get(healthz))
}

/// Serve the health endpoint on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn serve(addr: SocketAddr, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "Serving health endpoint");
    axum::serve(listener, router())
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_returns_ok_with_version() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], DRIVER_VERSION);
    }
}

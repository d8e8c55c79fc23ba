//! Liveness endpoint, served on its own task so it stays responsive while
//! merges are in flight.

use std::net::SocketAddr;

use axum::routing::get;
use axum::{Json, Router};
use tracing::info;

pub fn router() -> Router {
    Router::new().route("/healthz", get(healthz))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "msg": "mergebot running" }))
}

pub async fn serve(addr: SocketAddr) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "liveness endpoint listening");
    axum::serve(listener, router()).await
}

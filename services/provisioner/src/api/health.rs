//! Liveness probe.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::provisioner::Provisioner;

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub nodes: usize,
}

pub fn routes() -> Router<Provisioner> {
    Router::new().route("/healthz", get(healthz))
}

async fn healthz(State(provisioner): State<Provisioner>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: provisioner.config().service_name.clone(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        nodes: provisioner.stats().nodes.len(),
    })
}

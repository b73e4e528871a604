//! Stats and orphan management.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use brokerd_id::SweepId;
use brokerd_reconcile::OrphanSet;
use serde::Serialize;

use super::error::ApiError;
use crate::orphans::{OrphanReport, PurgeSummary};
use crate::provisioner::{Provisioner, ProvisionerStats};

#[derive(Debug, Serialize)]
pub struct SweepStarted {
    pub sweep_id: SweepId,
    pub confirm_after_secs: u64,
}

pub fn routes() -> Router<Provisioner> {
    Router::new()
        .route("/varz", get(varz))
        .route("/orphans", get(list_orphans))
        .route("/orphans/check", post(check_orphans))
        .route("/orphans/purge", post(purge_orphans))
}

async fn varz(State(provisioner): State<Provisioner>) -> Json<ProvisionerStats> {
    Json(provisioner.stats())
}

async fn list_orphans(State(provisioner): State<Provisioner>) -> Json<OrphanReport> {
    Json(provisioner.orphans())
}

/// Start phase one now; phase two runs after the confirm delay.
async fn check_orphans(
    State(provisioner): State<Provisioner>,
) -> Result<impl IntoResponse, ApiError> {
    let sweep_id = provisioner.check_orphans().await?;
    provisioner.schedule_confirmation(sweep_id);
    Ok((
        StatusCode::ACCEPTED,
        Json(SweepStarted {
            sweep_id,
            confirm_after_secs: provisioner.config().orphan_confirm_delay.as_secs(),
        }),
    ))
}

/// Empty body purges everything confirmed.
async fn purge_orphans(
    State(provisioner): State<Provisioner>,
    body: Bytes,
) -> Result<Json<PurgeSummary>, ApiError> {
    let selection = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(
            serde_json::from_slice::<OrphanSet>(&body)
                .map_err(|e| ApiError::bad_request(e.to_string()))?,
        )
    };
    Ok(Json(provisioner.purge_orphans(selection).await?))
}

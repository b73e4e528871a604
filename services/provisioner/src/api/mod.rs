//! Operational HTTP API.

pub mod error;
mod health;
mod ops;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::provisioner::Provisioner;

pub use ops::SweepStarted;

pub fn create_router(provisioner: Provisioner) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(ops::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(provisioner)
}

//! HTTP and WebSocket surface.
//!
//! Every JSON response uses the `{status, data | message}` envelope. Caller
//! identity comes from the `x-user-id` / `x-user-role` headers set by the
//! authentication layer in front of this service.

mod caller;
mod error;
mod reservations;
mod resources;
mod ws;

pub use caller::{Caller, USER_ID_HEADER, USER_ROLE_HEADER};
pub use error::ApiError;

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

use crate::engine::Engine;
use crate::gateway::Gateway;
use crate::telemetry::Relay;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub relay: Arc<Relay>,
    pub gateway: Arc<Gateway>,
    /// Ends open observer sockets on shutdown.
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    let resources = Router::new()
        .route("/{id}/check-availability", get(resources::check_availability))
        .route("/{id}/unavailable-dates", get(resources::unavailable_dates))
        .route("/{id}/ring", post(resources::ring));

    let reservations = Router::new()
        .route("/", post(reservations::create).get(reservations::list))
        .route("/monthly-stats", get(reservations::monthly_stats))
        .route("/yearly-stats", get(reservations::yearly_stats))
        .route("/tracking", get(reservations::tracking))
        .route("/approve/{id}", patch(reservations::approve))
        .route("/reject/{id}", patch(reservations::reject))
        .route("/cancel/{id}", patch(reservations::cancel))
        .route("/{id}", get(reservations::get_one).patch(reservations::update));

    Router::new()
        .nest("/resources", resources)
        .nest("/reservations", reservations)
        .route("/telemetry", post(resources::ingest_telemetry))
        .route("/ws", get(ws::connect))
        .with_state(state)
}

fn success<T: Serialize>(data: T) -> Json<Value> {
    Json(json!({ "status": "success", "data": data }))
}

fn parse_id(raw: &str) -> Result<Ulid, ApiError> {
    Ulid::from_string(raw.trim()).map_err(|_| ApiError::BadRequest(format!("Invalid id: {raw}")))
}

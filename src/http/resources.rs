use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::{parse_id, success, ApiError, AppState, Caller};
use crate::model::{ConflictWindow, RequestedWindow};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityQuery {
    start_date: String,
    end_date: String,
    #[serde(default)]
    exclude_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeQuery {
    #[serde(default)]
    from_date: Option<String>,
    #[serde(default)]
    to_date: Option<String>,
}

/// A single date bound: date-only inputs cover the whole day.
fn parse_bound(raw: &str, upper: bool) -> Result<DateTime<Utc>, ApiError> {
    let window = RequestedWindow::parse(raw, raw).map_err(ApiError::BadRequest)?.window;
    Ok(if upper { window.end } else { window.start })
}

pub async fn check_availability(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<AvailabilityQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let vehicle_id = parse_id(&id)?;
    let request =
        RequestedWindow::parse(&query.start_date, &query.end_date).map_err(ApiError::BadRequest)?;
    let exclude = query.exclude_id.as_deref().map(parse_id).transpose()?;
    let availability = state
        .engine
        .query_availability(vehicle_id, &request, exclude)
        .await?;
    let conflicts: Vec<ConflictWindow> =
        availability.conflicts.iter().map(ConflictWindow::from).collect();
    Ok(success(json!({
        "available": availability.available,
        "conflicts": conflicts,
    })))
}

pub async fn unavailable_dates(
    State(state): State<AppState>,
    Path(id): Path<String>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let from = query.from_date.as_deref().map(|s| parse_bound(s, false)).transpose()?;
    let to = query.to_date.as_deref().map(|s| parse_bound(s, true)).transpose()?;
    let windows = state
        .engine
        .unavailable_dates(parse_id(&id)?, from, to)
        .await?;
    Ok(success(windows))
}

pub async fn ring(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    state.relay.ring_resource(&id).await?;
    Ok(success(json!({ "message": "Ring command sent" })))
}

/// Device bridge: the raw body goes onto the inbound telemetry topic as-is.
pub async fn ingest_telemetry(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    state.relay.ingest_raw(body).await?;
    Ok((StatusCode::ACCEPTED, success(json!({ "accepted": true }))))
}

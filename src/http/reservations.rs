use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use super::{parse_id, success, ApiError, AppState, Caller};
use crate::engine::{EngineError, ListQuery, NewReservation, ReservationUpdate};
use crate::model::RequestedWindow;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBody {
    #[serde(alias = "car", alias = "resourceId")]
    vehicle_id: String,
    start_date: String,
    end_date: String,
    #[serde(default)]
    paid: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
    #[serde(default, alias = "car", alias = "resourceId")]
    vehicle_id: Option<String>,
    #[serde(default)]
    start_date: Option<String>,
    #[serde(default)]
    end_date: Option<String>,
    #[serde(default)]
    paid: Option<bool>,
}

fn parse_window(start: &str, end: &str) -> Result<RequestedWindow, ApiError> {
    RequestedWindow::parse(start, end).map_err(ApiError::BadRequest)
}

pub async fn create(
    State(state): State<AppState>,
    caller: Caller,
    body: Result<Json<CreateBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let reservation = state
        .engine
        .create(NewReservation {
            vehicle_id: parse_id(&body.vehicle_id)?,
            user_id: caller.user_id,
            window: parse_window(&body.start_date, &body.end_date)?,
            paid: body.paid,
        })
        .await?;
    Ok((StatusCode::CREATED, success(reservation)))
}

/// Admins see everything (optionally filtered); users see their own bookings.
pub async fn list(
    State(state): State<AppState>,
    caller: Caller,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(mut query) = query?;
    if !caller.admin {
        query.user_id = Some(caller.user_id);
    }
    Ok(success(state.engine.list(&query).await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let reservation = state.engine.get(parse_id(&id)?).await?;
    if !caller.admin && reservation.user_id != caller.user_id {
        return Err(EngineError::NotFound("Booking not found").into());
    }
    Ok(success(reservation))
}

pub async fn update(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    body: Result<Json<UpdateBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    let Json(body) = body?;
    let window = match (&body.start_date, &body.end_date) {
        (Some(start), Some(end)) => Some(parse_window(start, end)?),
        (None, None) => None,
        _ => {
            return Err(ApiError::BadRequest(
                "startDate and endDate must be changed together".into(),
            ));
        }
    };
    let changes = ReservationUpdate {
        vehicle_id: body.vehicle_id.as_deref().map(parse_id).transpose()?,
        window,
        paid: body.paid,
    };
    Ok(success(state.engine.update(parse_id(&id)?, changes).await?))
}

pub async fn approve(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    Ok(success(state.engine.approve(parse_id(&id)?).await?))
}

pub async fn reject(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    Ok(success(state.engine.reject(parse_id(&id)?).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let reservation = state.engine.cancel(parse_id(&id)?, &caller.actor()).await?;
    Ok(success(reservation))
}

pub async fn monthly_stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    Ok(success(state.engine.monthly_stats(Utc::now()).await?))
}

pub async fn yearly_stats(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    Ok(success(state.engine.yearly_stats(Utc::now()).await?))
}

pub async fn tracking(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, ApiError> {
    caller.require_admin()?;
    Ok(success(state.engine.tracking().await?))
}

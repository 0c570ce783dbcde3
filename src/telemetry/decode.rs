//! Device payload decoding.
//!
//! Devices report positions in one of two field-naming schemes:
//! `{resourceId, latitude, longitude, status?}` or the older
//! `{carID | id, lat, lon, status?}`. Both decode to one `PositionSample`.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::limits::{MAX_DEVICE_ID_LEN, MAX_TELEMETRY_PAYLOAD_BYTES};
use crate::model::PositionSample;

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload of {0} bytes exceeds the limit")]
    TooLarge(usize),
    #[error("payload is not JSON: {0}")]
    NotJson(String),
    #[error("payload matches no known position format")]
    UnknownShape,
    #[error("device id is empty or too long")]
    BadDeviceId,
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

/// Device ids arrive as strings or bare integers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DeviceId {
    Text(String),
    Number(serde_json::Number),
}

impl DeviceId {
    fn into_string(self) -> String {
        match self {
            DeviceId::Text(s) => s.trim().to_string(),
            DeviceId::Number(n) => n.to_string(),
        }
    }
}

/// Coordinates arrive as numbers or numeric strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Coord {
    Number(f64),
    Text(String),
}

impl Coord {
    fn value(&self) -> Option<f64> {
        match self {
            Coord::Number(v) => Some(*v),
            Coord::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Canonical {
    resource_id: DeviceId,
    latitude: Coord,
    longitude: Coord,
    #[serde(default)]
    status: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Legacy {
    #[serde(rename = "carID", alias = "id")]
    car_id: DeviceId,
    lat: Coord,
    lon: Coord,
    #[serde(default)]
    status: Option<Value>,
}

/// The union of accepted shapes, tried in order.
enum Shape {
    Canonical(Canonical),
    Legacy(Legacy),
}

impl Shape {
    fn parse(value: Value) -> Result<Self, DecodeError> {
        match serde_json::from_value::<Canonical>(value.clone()) {
            Ok(c) => Ok(Shape::Canonical(c)),
            Err(_) => serde_json::from_value::<Legacy>(value)
                .map(Shape::Legacy)
                .map_err(|_| DecodeError::UnknownShape),
        }
    }

    fn into_parts(self) -> (DeviceId, Coord, Coord, Option<Value>) {
        match self {
            Shape::Canonical(c) => (c.resource_id, c.latitude, c.longitude, c.status),
            Shape::Legacy(l) => (l.car_id, l.lat, l.lon, l.status),
        }
    }
}

fn status_text(status: Option<Value>) -> Option<String> {
    match status? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn checked(field: &'static str, coord: &Coord, limit: f64) -> Result<f64, DecodeError> {
    let value = coord.value().ok_or(DecodeError::UnknownShape)?;
    if !value.is_finite() || value.abs() > limit {
        return Err(DecodeError::OutOfRange { field, value });
    }
    Ok(value)
}

pub fn decode(payload: &[u8], received_at: DateTime<Utc>) -> Result<PositionSample, DecodeError> {
    if payload.len() > MAX_TELEMETRY_PAYLOAD_BYTES {
        return Err(DecodeError::TooLarge(payload.len()));
    }
    let value: Value =
        serde_json::from_slice(payload).map_err(|e| DecodeError::NotJson(e.to_string()))?;
    let (id, lat, lon, status) = Shape::parse(value)?.into_parts();

    let device_id = id.into_string();
    if device_id.is_empty() || device_id.len() > MAX_DEVICE_ID_LEN {
        return Err(DecodeError::BadDeviceId);
    }
    Ok(PositionSample {
        device_id,
        latitude: checked("latitude", &lat, 90.0)?,
        longitude: checked("longitude", &lon, 180.0)?,
        status: status_text(status),
        recorded_at: received_at,
    })
}

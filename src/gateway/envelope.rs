use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Event names carried in `Envelope::kind`.
pub mod event {
    pub const LOCATION_UPDATE: &str = "location_update";
    pub const CAR_INACTIVE: &str = "car_inactive";
    pub const ADMIN_CONFIRMATION: &str = "adminConfirmation";
    pub const CLIENT_RECONNECTED: &str = "clientReconnected";
    pub const RESERVATION_STATUS: &str = "reservation_status";
    pub const ERROR: &str = "error";
}

/// Room names.
pub mod room {
    pub const ALL: &str = "all";
    pub const ADMIN: &str = "admin_room";
    const RESOURCE_PREFIX: &str = "resource_";

    pub fn resource(id: impl std::fmt::Display) -> String {
        format!("{RESOURCE_PREFIX}{id}")
    }

    pub fn is_resource(name: &str) -> bool {
        name.strip_prefix(RESOURCE_PREFIX).is_some_and(|rest| !rest.is_empty())
    }
}

/// Everything pushed to an observer is wrapped in one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Envelope {
    pub fn new(kind: &str, payload: Value) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(event::ERROR, serde_json::json!({ "message": message.into() }))
    }

    pub fn to_json(&self) -> String {
        // Value-backed envelopes always serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

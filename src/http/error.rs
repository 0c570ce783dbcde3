use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::engine::{EngineError, ErrorKind};
use crate::gateway::GatewayError;
use crate::telemetry::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{0}")]
    BadRequest(String),
    #[error("Authentication required")]
    Unauthorized,
    #[error("Admin access required")]
    Forbidden,
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Engine(e) => match e.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Gateway(e) => match e {
                GatewayError::BadSecret => StatusCode::UNAUTHORIZED,
                GatewayError::AdminDisabled | GatewayError::RoomNotAllowed(_) => {
                    StatusCode::FORBIDDEN
                }
                GatewayError::AdminAlreadyConnected => StatusCode::CONFLICT,
                GatewayError::UnknownSession(_) => StatusCode::NOT_FOUND,
                GatewayError::TooManyRooms | GatewayError::InvalidClientId => {
                    StatusCode::BAD_REQUEST
                }
            },
            Self::Transport(e) => match e {
                TransportError::InvalidTopic(_) => StatusCode::BAD_REQUEST,
                TransportError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
                TransportError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Engine(EngineError::Conflict { message, conflicts }) => json!({
                "status": "error",
                "message": message,
                "conflicts": conflicts,
            }),
            _ if status.is_server_error() => {
                error!("request failed: {self}");
                json!({ "status": "error", "message": "Internal server error" })
            }
            _ => json!({ "status": "error", "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

use crate::model::{ConflictWindow, ReservationStatus};
use crate::store::StoreError;

/// Caller-facing class of an engine error; maps onto 400/404/409/500.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{message}")]
    Conflict {
        message: String,
        conflicts: Vec<ConflictWindow>,
    },
    #[error("cannot move booking from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },
    /// Availability could not be determined. Not the same as "unavailable".
    #[error("availability check failed: {0}")]
    AvailabilityCheck(#[source] StoreError),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict { .. } | Self::InvalidTransition { .. } => ErrorKind::Conflict,
            Self::AvailabilityCheck(_) | Self::Storage(_) => ErrorKind::Internal,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_status_codes() {
        assert_eq!(EngineError::Validation("bad".into()).status_code(), 400);
        assert_eq!(EngineError::NotFound("Car not found").status_code(), 404);
        let conflict = EngineError::Conflict {
            message: "taken".into(),
            conflicts: vec![],
        };
        assert_eq!(conflict.status_code(), 409);
        let transition = EngineError::InvalidTransition {
            from: ReservationStatus::Completed,
            to: ReservationStatus::Cancelled,
        };
        assert_eq!(transition.kind(), ErrorKind::Conflict);
        assert_eq!(transition.to_string(), "cannot move booking from completed to cancelled");
        let storage = EngineError::AvailabilityCheck(StoreError::WriterClosed);
        assert_eq!(storage.kind(), ErrorKind::Internal);
    }
}

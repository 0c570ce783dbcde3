mod availability;
mod error;
mod mutations;
pub mod pricing;
mod queries;

pub use availability::validate_dates;
pub use error::{EngineError, ErrorKind};
pub use mutations::{NewReservation, ReservationUpdate};
pub use queries::ListQuery;

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use ulid::Ulid;

use crate::gateway::{event, room, Envelope, Fanout};
use crate::limits::DEFAULT_MAX_ADVANCE_DAYS;
use crate::model::*;
use crate::store::{ReservationStore, VehicleDirectory};

const CAR_NOT_FOUND: &str = "Car not found";

/// Booking policy knobs.
#[derive(Debug, Clone, Copy)]
pub struct Policy {
    /// Furthest a booking may start from today, in days.
    pub max_advance_days: i64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_advance_days: DEFAULT_MAX_ADVANCE_DAYS,
        }
    }
}

/// Who is asking. Ownership checks use `user_id`; privileged callers bypass them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub privileged: bool,
}

impl Actor {
    pub fn user(id: impl Into<String>) -> Self {
        Self {
            user_id: id.into(),
            privileged: false,
        }
    }

    pub fn admin(id: impl Into<String>) -> Self {
        Self {
            user_id: id.into(),
            privileged: true,
        }
    }

    fn may_act_on(&self, r: &Reservation) -> bool {
        self.privileged || self.user_id == r.user_id
    }
}

/// Availability engine and booking lifecycle over an interval store.
///
/// Every check-then-write sequence that can create an overlap (create,
/// approve, reschedule) runs under the affected vehicle's lock. Status writes
/// are conditioned on the status read, so scheduler ticks and explicit actions
/// never overwrite each other blindly.
pub struct Engine {
    pub(super) store: Arc<dyn ReservationStore>,
    pub(super) vehicles: Arc<dyn VehicleDirectory>,
    pub(super) policy: Policy,
    locks: DashMap<Ulid, Arc<Mutex<()>>>,
    fanout: Fanout,
}

impl Engine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        vehicles: Arc<dyn VehicleDirectory>,
        policy: Policy,
        fanout: Fanout,
    ) -> Self {
        Self {
            store,
            vehicles,
            policy,
            locks: DashMap::new(),
            fanout,
        }
    }

    pub fn policy(&self) -> Policy {
        self.policy
    }

    pub(super) async fn require_vehicle(&self, id: Ulid) -> Result<Vehicle, EngineError> {
        self.vehicles
            .find_vehicle_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(CAR_NOT_FOUND))
    }

    fn vehicle_mutex(&self, vehicle_id: Ulid) -> Arc<Mutex<()>> {
        self.locks.entry(vehicle_id).or_default().clone()
    }

    pub(super) async fn lock_vehicle(&self, vehicle_id: Ulid) -> OwnedMutexGuard<()> {
        self.vehicle_mutex(vehicle_id).lock_owned().await
    }

    /// Lock one or two vehicles, always in id order.
    pub(super) async fn lock_vehicles(&self, a: Ulid, b: Ulid) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = vec![a, b];
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock_vehicle(id).await);
        }
        guards
    }

    /// Tell the admin room about a status change.
    pub(super) fn status_changed(&self, r: &Reservation, source: &'static str) {
        metrics::counter!(
            crate::observability::STATUS_TRANSITIONS_TOTAL,
            "to" => r.status.as_str(),
            "source" => source
        )
        .increment(1);
        let payload = serde_json::json!({
            "id": r.id,
            "vehicleId": r.vehicle_id,
            "userId": r.user_id,
            "status": r.status,
            "startDate": r.start_date,
            "endDate": r.end_date,
        });
        self.fanout
            .send(room::ADMIN, Envelope::new(event::RESERVATION_STATUS, payload));
    }
}

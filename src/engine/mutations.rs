use chrono::{DateTime, Utc};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_USER_ID_LEN;
use crate::model::*;
use crate::observability::{CONFLICTS_TOTAL, RESERVATIONS_CREATED_TOTAL};
use crate::store::{ConditionalUpdate, Filter, Patch};

use super::availability::conflict_error;
use super::pricing::quote;
use super::{Actor, Engine, EngineError};

const CREATE_CONFLICT: &str = "Car is not available for the selected dates. Conflicting bookings: ";
const APPROVE_CONFLICT: &str = "Cannot approve booking. Car is already booked for these dates: ";
const BOOKING_NOT_FOUND: &str = "Booking not found";

#[derive(Debug, Clone)]
pub struct NewReservation {
    pub vehicle_id: Ulid,
    pub user_id: String,
    pub window: RequestedWindow,
    pub paid: bool,
}

/// Privileged field update. Unset fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct ReservationUpdate {
    pub vehicle_id: Option<Ulid>,
    pub window: Option<RequestedWindow>,
    pub paid: Option<bool>,
}

impl Engine {
    pub async fn create(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        let now = Utc::now();
        let user_id = req.user_id.trim();
        if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
            return Err(EngineError::Validation("A valid user is required".into()));
        }
        self.validate_dates(&req.window, now)?;

        let vehicle = self.require_vehicle(req.vehicle_id).await?;
        if !vehicle.is_bookable() {
            return Err(EngineError::Validation("This car is not available for booking".into()));
        }

        let _guard = self.lock_vehicle(vehicle.id).await;
        let availability = self.check_availability(vehicle.id, &req.window, None).await?;
        if !availability.available {
            metrics::counter!(CONFLICTS_TOTAL, "op" => "create").increment(1);
            return Err(conflict_error(CREATE_CONFLICT, &availability.conflicts));
        }

        let window = req.window.window.normalized(req.window.granularity);
        let priced = quote(&window, req.window.granularity, &vehicle.rates);
        let reservation = Reservation {
            id: Ulid::new(),
            vehicle_id: vehicle.id,
            user_id: user_id.to_string(),
            start_date: window.start,
            end_date: window.end,
            granularity: req.window.granularity,
            duration: priced.duration,
            total_cost: priced.total_cost,
            rates: vehicle.rates,
            paid: req.paid,
            status: ReservationStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.create(reservation).await?;
        metrics::counter!(RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            "reservation {} created for vehicle {} ({})",
            stored.id,
            stored.vehicle_id,
            stored.window().display_days()
        );
        Ok(stored)
    }

    /// pending → approved, after re-checking for overlaps that appeared since
    /// the request was made. Approving an approved booking is a no-op.
    pub async fn approve(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let current = self.require(id).await?;
        if current.status == ReservationStatus::Approved {
            return Ok(current);
        }
        if !current.status.can_transition_to(ReservationStatus::Approved) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: ReservationStatus::Approved,
            });
        }

        let _guard = self.lock_vehicle(current.vehicle_id).await;
        // Re-read under the lock: a reschedule may have landed in between.
        let current = match self.require(id).await? {
            r if r.vehicle_id == current.vehicle_id => r,
            _ => {
                return Err(EngineError::Conflict {
                    message: "Booking was moved to another car while approving, retry".into(),
                    conflicts: Vec::new(),
                });
            }
        };
        let availability = self.check_approval_conflicts(&current).await?;
        if !availability.available {
            metrics::counter!(CONFLICTS_TOTAL, "op" => "approve").increment(1);
            return Err(conflict_error(APPROVE_CONFLICT, &availability.conflicts));
        }
        self.transition(id, ReservationStatus::Approved, "action").await
    }

    /// pending|approved → rejected.
    pub async fn reject(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.transition(id, ReservationStatus::Rejected, "action").await
    }

    /// Any non-terminal status → cancelled. Repeating a cancel returns the
    /// cancelled record. Non-privileged actors may only cancel their own.
    pub async fn cancel(&self, id: Ulid, actor: &Actor) -> Result<Reservation, EngineError> {
        let current = self.require(id).await?;
        if !actor.may_act_on(&current) {
            return Err(EngineError::NotFound(BOOKING_NOT_FOUND));
        }
        self.transition(id, ReservationStatus::Cancelled, "action").await
    }

    /// Conditional status write. Landing on the status the record already has
    /// is treated as success so retries are harmless.
    async fn transition(
        &self,
        id: Ulid,
        to: ReservationStatus,
        source: &'static str,
    ) -> Result<Reservation, EngineError> {
        let sources = ReservationStatus::sources_of(to);
        match self
            .store
            .find_by_id_and_update(id, &Patch::status(to), Some(sources.as_slice()))
            .await?
        {
            ConditionalUpdate::Updated(r) => {
                info!("reservation {id} → {to}");
                self.status_changed(&r, source);
                Ok(r)
            }
            ConditionalUpdate::StatusMismatch(r) if r.status == to => {
                debug!("reservation {id} already {to}");
                Ok(r)
            }
            ConditionalUpdate::StatusMismatch(r) => Err(EngineError::InvalidTransition {
                from: r.status,
                to,
            }),
            ConditionalUpdate::NotFound => Err(EngineError::NotFound(BOOKING_NOT_FOUND)),
        }
    }

    /// Privileged update. Moving the booking to another vehicle or window
    /// re-validates the dates, re-checks availability excluding itself and
    /// re-prices at the target vehicle's current rates.
    pub async fn update(
        &self,
        id: Ulid,
        changes: ReservationUpdate,
    ) -> Result<Reservation, EngineError> {
        let current = self.require(id).await?;
        let moves_vehicle = changes.vehicle_id.is_some_and(|v| v != current.vehicle_id);
        let current_window = RequestedWindow {
            window: current.window(),
            granularity: current.granularity,
        };
        let moves_window = changes.window.is_some_and(|w| w != current_window);

        if !moves_vehicle && !moves_window {
            let patch = Patch {
                paid: changes.paid,
                ..Patch::default()
            };
            if patch.is_empty() {
                return Ok(current);
            }
            return match self.store.find_by_id_and_update(id, &patch, None).await? {
                ConditionalUpdate::Updated(r) | ConditionalUpdate::StatusMismatch(r) => Ok(r),
                ConditionalUpdate::NotFound => Err(EngineError::NotFound(BOOKING_NOT_FOUND)),
            };
        }

        if current.status.is_terminal() {
            return Err(EngineError::Validation(format!(
                "Booking is {} and can no longer be rescheduled",
                current.status
            )));
        }
        let target = changes.window.unwrap_or(current_window);
        if moves_window {
            self.validate_dates(&target, Utc::now())?;
        }
        let vehicle_id = changes.vehicle_id.unwrap_or(current.vehicle_id);
        let vehicle = self.require_vehicle(vehicle_id).await?;
        if moves_vehicle && !vehicle.is_bookable() {
            return Err(EngineError::Validation("This car is not available for booking".into()));
        }

        let _guards = self.lock_vehicles(current.vehicle_id, vehicle_id).await;
        let availability = self.check_availability(vehicle_id, &target, Some(id)).await?;
        if !availability.available {
            metrics::counter!(CONFLICTS_TOTAL, "op" => "update").increment(1);
            return Err(conflict_error(CREATE_CONFLICT, &availability.conflicts));
        }

        let window = target.window.normalized(target.granularity);
        let priced = quote(&window, target.granularity, &vehicle.rates);
        let patch = Patch {
            vehicle_id: Some(vehicle_id),
            start_date: Some(window.start),
            end_date: Some(window.end),
            granularity: Some(target.granularity),
            duration: Some(priced.duration),
            total_cost: Some(priced.total_cost),
            rates: Some(vehicle.rates),
            paid: changes.paid,
            ..Patch::default()
        };
        match self
            .store
            .find_by_id_and_update(id, &patch, Some(std::slice::from_ref(&current.status)))
            .await?
        {
            ConditionalUpdate::Updated(r) => {
                info!("reservation {id} rescheduled to {}", r.window().display_days());
                Ok(r)
            }
            ConditionalUpdate::StatusMismatch(r) => Err(EngineError::Conflict {
                message: format!(
                    "Booking changed from {} to {} while updating, retry",
                    current.status, r.status
                ),
                conflicts: Vec::new(),
            }),
            ConditionalUpdate::NotFound => Err(EngineError::NotFound(BOOKING_NOT_FOUND)),
        }
    }

    /// One scheduler pass: approved bookings whose start has passed become
    /// ongoing, ongoing bookings whose end has passed become completed.
    /// Each step is a single bulk conditional update; re-running with nothing
    /// due changes nothing.
    pub async fn advance_statuses(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let started = self
            .store
            .update_many(
                &Filter::default()
                    .statuses(&[ReservationStatus::Approved])
                    .starts_by(now),
                &Patch::status(ReservationStatus::Ongoing),
            )
            .await?;
        let finished = self
            .store
            .update_many(
                &Filter::default()
                    .statuses(&[ReservationStatus::Ongoing])
                    .ends_by(now),
                &Patch::status(ReservationStatus::Completed),
            )
            .await?;

        for r in started.iter().chain(&finished) {
            self.status_changed(r, "scheduler");
        }
        if !started.is_empty() || !finished.is_empty() {
            info!(
                "scheduler: {} started, {} completed",
                started.len(),
                finished.len()
            );
        }
        let mut changed = started;
        changed.extend(finished);
        Ok(changed)
    }

    /// Link a telemetry sample to the ongoing reservation of `vehicle_id`
    /// whose window contains the sample time. Returns the reservation id, or
    /// `None` when no reservation matched and nothing was stored.
    pub async fn record_position(
        &self,
        vehicle_id: Ulid,
        sample: PositionSample,
    ) -> Result<Option<Ulid>, EngineError> {
        let filter = Filter::default()
            .vehicle(vehicle_id)
            .statuses(&[ReservationStatus::Ongoing]);
        let Some(reservation) = self
            .store
            .find(&filter)
            .await?
            .into_iter()
            .find(|r| r.window().contains_instant(sample.recorded_at))
        else {
            return Ok(None);
        };
        self.store.append_position(reservation.id, sample).await?;
        Ok(Some(reservation.id))
    }

    pub(super) async fn require(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(EngineError::NotFound(BOOKING_NOT_FOUND))
    }
}

use chrono::{DateTime, TimeDelta, Utc};
use ulid::Ulid;

use crate::limits::{DEFAULT_UNAVAILABLE_HORIZON_DAYS, MAX_QUERY_WINDOW_DAYS, MAX_RESERVATION_DAYS};
use crate::model::*;
use crate::store::Filter;

use super::{Engine, EngineError, Policy};

fn horizon_label(days: i64) -> String {
    match days {
        365 => "1 year".to_string(),
        1 => "1 day".to_string(),
        n => format!("{n} days"),
    }
}

/// Booking-date rules, checked before anything touches storage.
///
/// Day requests compare calendar dates (UTC); hour requests compare instants.
pub fn validate_dates(
    request: &RequestedWindow,
    now: DateTime<Utc>,
    policy: &Policy,
) -> Result<(), String> {
    let Window { start, end } = request.window;
    let ordered = match request.granularity {
        Granularity::Day => start <= end,
        Granularity::Hour => start < end,
    };
    if !ordered {
        return Err("Start date must be before end date".into());
    }
    let in_past = match request.granularity {
        Granularity::Day => start.date_naive() < now.date_naive(),
        Granularity::Hour => start < now,
    };
    if in_past {
        return Err("Start date must be today or in the future".into());
    }
    let latest_start = now.date_naive() + TimeDelta::days(policy.max_advance_days);
    if start.date_naive() > latest_start {
        return Err(format!(
            "Booking cannot be made more than {} in advance",
            horizon_label(policy.max_advance_days)
        ));
    }
    if end - start > TimeDelta::days(MAX_RESERVATION_DAYS) {
        return Err(format!("Booking cannot be longer than {MAX_RESERVATION_DAYS} days"));
    }
    Ok(())
}

/// `<prefix><window> (<status>), <window> (<status>)`
pub(super) fn conflict_error(prefix: &str, conflicts: &[Reservation]) -> EngineError {
    let rendered: Vec<String> = conflicts.iter().map(Reservation::describe_window).collect();
    EngineError::Conflict {
        message: format!("{prefix}{}", rendered.join(", ")),
        conflicts: conflicts.iter().map(ConflictWindow::from).collect(),
    }
}

impl Engine {
    pub fn validate_dates(&self, request: &RequestedWindow, now: DateTime<Utc>) -> Result<(), EngineError> {
        validate_dates(request, now, &self.policy).map_err(EngineError::Validation)
    }

    /// Active reservations on `vehicle_id` that overlap the request.
    ///
    /// Day requests are widened to whole days before comparing. Storage
    /// failures surface as `AvailabilityCheck`, never as "unavailable".
    pub async fn check_availability(
        &self,
        vehicle_id: Ulid,
        request: &RequestedWindow,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        let window = request.window.normalized(request.granularity);
        let filter = Filter::default()
            .vehicle(vehicle_id)
            .statuses(&ACTIVE_STATUSES)
            .excluding(exclude)
            .overlapping(window);
        let conflicts = self
            .store
            .find(&filter)
            .await
            .map_err(EngineError::AvailabilityCheck)?;
        Ok(Availability {
            available: conflicts.is_empty(),
            conflicts,
        })
    }

    /// Caller-facing availability query: the dates must pass the booking
    /// rules and the vehicle must exist, so "unknown" never reads as "free".
    pub async fn query_availability(
        &self,
        vehicle_id: Ulid,
        request: &RequestedWindow,
        exclude: Option<Ulid>,
    ) -> Result<Availability, EngineError> {
        self.validate_dates(request, Utc::now())?;
        self.require_vehicle(vehicle_id).await?;
        self.check_availability(vehicle_id, request, exclude).await
    }

    /// Same check as `check_availability`, for approving `reservation`:
    /// the reservation itself never counts against it.
    pub async fn check_approval_conflicts(
        &self,
        reservation: &Reservation,
    ) -> Result<Availability, EngineError> {
        let request = RequestedWindow {
            window: reservation.window(),
            granularity: reservation.granularity,
        };
        self.check_availability(reservation.vehicle_id, &request, Some(reservation.id))
            .await
    }

    /// Raw active reservations intersecting `[from, to]`, unmerged.
    /// Defaults to now .. now + one year.
    pub async fn unavailable_dates(
        &self,
        vehicle_id: Ulid,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<ConflictWindow>, EngineError> {
        let from = from.unwrap_or_else(Utc::now);
        let to = match to {
            Some(to) => to,
            None => from
                .checked_add_signed(TimeDelta::days(DEFAULT_UNAVAILABLE_HORIZON_DAYS))
                .ok_or_else(|| EngineError::Validation("fromDate is out of range".into()))?,
        };
        if from > to {
            return Err(EngineError::Validation("fromDate must not be after toDate".into()));
        }
        if to - from > TimeDelta::days(MAX_QUERY_WINDOW_DAYS) {
            return Err(EngineError::Validation(format!(
                "Date range cannot exceed {MAX_QUERY_WINDOW_DAYS} days"
            )));
        }
        self.require_vehicle(vehicle_id).await?;
        let filter = Filter::default()
            .vehicle(vehicle_id)
            .statuses(&ACTIVE_STATUSES)
            .overlapping(Window::new(from, to));
        let found = self
            .store
            .find(&filter)
            .await
            .map_err(EngineError::AvailabilityCheck)?;
        Ok(found.iter().map(ConflictWindow::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 15, 0, 0).unwrap()
    }

    fn days(a: (i32, u32, u32), b: (i32, u32, u32)) -> RequestedWindow {
        RequestedWindow::days(
            NaiveDate::from_ymd_opt(a.0, a.1, a.2).unwrap(),
            NaiveDate::from_ymd_opt(b.0, b.1, b.2).unwrap(),
        )
    }

    #[test]
    fn start_after_end_rejected() {
        let err = validate_dates(&days((2025, 3, 10), (2025, 3, 5)), now(), &Policy::default());
        assert_eq!(err.unwrap_err(), "Start date must be before end date");
    }

    #[test]
    fn today_is_allowed_even_after_midnight() {
        assert!(validate_dates(&days((2025, 3, 1), (2025, 3, 1)), now(), &Policy::default()).is_ok());
    }

    #[test]
    fn yesterday_rejected() {
        let err = validate_dates(&days((2025, 2, 28), (2025, 3, 2)), now(), &Policy::default());
        assert_eq!(err.unwrap_err(), "Start date must be today or in the future");
    }

    #[test]
    fn hour_requests_compare_instants() {
        let past = RequestedWindow::parse("2025-03-01T14:00", "2025-03-01T18:00").unwrap();
        assert!(validate_dates(&past, now(), &Policy::default()).is_err());
        let later = RequestedWindow::parse("2025-03-01T16:00", "2025-03-01T18:00").unwrap();
        assert!(validate_dates(&later, now(), &Policy::default()).is_ok());
        let empty = RequestedWindow::parse("2025-03-01T16:00", "2025-03-01T16:00").unwrap();
        assert!(validate_dates(&empty, now(), &Policy::default()).is_err());
    }

    #[test]
    fn advance_horizon_is_policy() {
        let far = days((2026, 3, 2), (2026, 3, 3));
        assert_eq!(
            validate_dates(&far, now(), &Policy::default()).unwrap_err(),
            "Booking cannot be made more than 1 year in advance"
        );
        let lenient = Policy { max_advance_days: 400 };
        assert!(validate_dates(&far, now(), &lenient).is_ok());
        let strict = Policy { max_advance_days: 30 };
        assert_eq!(
            validate_dates(&days((2025, 4, 15), (2025, 4, 16)), now(), &strict).unwrap_err(),
            "Booking cannot be made more than 30 days in advance"
        );
    }

    #[test]
    fn overlong_booking_rejected() {
        let long = days((2025, 3, 2), (2027, 6, 1));
        let lenient = Policy { max_advance_days: 365 };
        assert!(validate_dates(&long, now(), &lenient).is_err());
    }
}

use chrono::{DateTime, Datelike, Months, NaiveDate, TimeDelta, Utc};
use serde::Deserialize;
use ulid::Ulid;

use crate::limits::TRACKING_POSITIONS;
use crate::model::*;
use crate::store::Filter;

use super::{Engine, EngineError};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub user_id: Option<String>,
    pub vehicle_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
}

fn month_window(now: DateTime<Utc>) -> Window {
    let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
    let last = first
        .checked_add_months(Months::new(1))
        .map_or(first, |next| next - TimeDelta::days(1));
    Window::whole_days(first, last)
}

fn year_window(now: DateTime<Utc>) -> Window {
    let year = now.year();
    match (
        NaiveDate::from_ymd_opt(year, 1, 1),
        NaiveDate::from_ymd_opt(year, 12, 31),
    ) {
        (Some(first), Some(last)) => Window::whole_days(first, last),
        _ => Window::new(now, now),
    }
}

impl Engine {
    pub async fn get(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.require(id).await
    }

    pub async fn list(&self, query: &ListQuery) -> Result<Vec<Reservation>, EngineError> {
        let mut filter = Filter::default();
        if let Some(user) = &query.user_id {
            filter = filter.user(user.clone());
        }
        if let Some(vehicle) = query.vehicle_id {
            filter = filter.vehicle(vehicle);
        }
        if let Some(status) = query.status {
            filter = filter.statuses(&[status]);
        }
        Ok(self.store.find(&filter).await?)
    }

    /// Paid bookings created in the calendar month (UTC) containing `now`.
    pub async fn monthly_stats(&self, now: DateTime<Utc>) -> Result<BookingStats, EngineError> {
        self.stats_within(month_window(now)).await
    }

    /// Paid bookings created in the calendar year (UTC) containing `now`.
    pub async fn yearly_stats(&self, now: DateTime<Utc>) -> Result<BookingStats, EngineError> {
        self.stats_within(year_window(now)).await
    }

    async fn stats_within(&self, window: Window) -> Result<BookingStats, EngineError> {
        let filter = Filter::default().paid(true).created_within(window);
        let found = self.store.find(&filter).await?;
        Ok(found.iter().fold(BookingStats::default(), |mut acc, r| {
            acc.total_revenue = acc.total_revenue.saturating_add(r.total_cost);
            acc.total_bookings += 1;
            if r.status == ReservationStatus::Cancelled {
                acc.total_cancelled += 1;
            }
            acc
        }))
    }

    /// Ongoing bookings with their most recent positions.
    pub async fn tracking(&self) -> Result<Vec<TrackedReservation>, EngineError> {
        let ongoing = self
            .store
            .find(&Filter::default().statuses(&[ReservationStatus::Ongoing]))
            .await?;
        let mut tracked = Vec::with_capacity(ongoing.len());
        for reservation in ongoing {
            let positions = self.store.positions(reservation.id, TRACKING_POSITIONS).await?;
            tracked.push(TrackedReservation {
                latest_position: positions.first().cloned(),
                positions,
                reservation,
            });
        }
        Ok(tracked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn month_window_spans_calendar_month() {
        let w = month_window(Utc.with_ymd_and_hms(2024, 2, 17, 8, 0, 0).unwrap());
        assert_eq!(w, Window::whole_days(
            NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
        ));
        let w = month_window(Utc.with_ymd_and_hms(2025, 12, 31, 23, 0, 0).unwrap());
        assert_eq!(w.end.date_naive(), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }

    #[test]
    fn year_window_spans_calendar_year() {
        let w = year_window(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
        assert_eq!(w.start, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(w.end.date_naive(), NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }
}

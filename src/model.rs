use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Reservation status. Declaration order is the forward order of the main path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Approved,
    Ongoing,
    Completed,
    Rejected,
    Cancelled,
}

/// Statuses that hold a vehicle and therefore participate in conflict checks.
pub const ACTIVE_STATUSES: [ReservationStatus; 2] =
    [ReservationStatus::Approved, ReservationStatus::Ongoing];

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        ACTIVE_STATUSES.contains(self)
    }

    pub fn can_transition_to(&self, next: ReservationStatus) -> bool {
        use ReservationStatus::*;
        matches!(
            (self, next),
            (Pending, Approved)
                | (Approved, Ongoing)
                | (Ongoing, Completed)
                | (Pending | Approved, Rejected)
                | (Pending | Approved | Ongoing, Cancelled)
        )
    }

    /// Statuses from which `next` is reachable in one step.
    pub fn sources_of(next: ReservationStatus) -> Vec<ReservationStatus> {
        use ReservationStatus::*;
        [Pending, Approved, Ongoing, Completed, Rejected, Cancelled]
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

impl std::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "ongoing" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    Hour,
}

/// Closed interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    #[serde(rename = "startDate")]
    pub start: DateTime<Utc>,
    #[serde(rename = "endDate")]
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `[first 00:00:00.000, last 23:59:59.999]`.
    pub fn whole_days(first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            start: start_of_day(first),
            end: end_of_day(last),
        }
    }

    /// Widen to whole days when comparing at day granularity.
    pub fn normalized(&self, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Day => Self::whole_days(self.start.date_naive(), self.end.date_naive()),
            Granularity::Hour => *self,
        }
    }

    /// Four-case overlap test on closed bounds: `self` is an existing
    /// reservation, `request` the window being checked. Sharing a single
    /// instant counts as a conflict.
    pub fn conflicts_with(&self, request: &Window) -> bool {
        let starts_inside = self.start >= request.start && self.start <= request.end;
        let ends_inside = self.end >= request.start && self.end <= request.end;
        let encloses_request = self.start <= request.start && self.end >= request.end;
        let enclosed_by_request = self.start >= request.start && self.end <= request.end;
        starts_inside || ends_inside || encloses_request || enclosed_by_request
    }

    pub fn contains_instant(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }

    /// `Mon Mar 03 2025 to Sat Mar 08 2025`
    pub fn display_days(&self) -> String {
        format!(
            "{} to {}",
            self.start.format("%a %b %d %Y"),
            self.end.format("%a %b %d %Y")
        )
    }
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let last = chrono::NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or(chrono::NaiveTime::MIN);
    date.and_time(last).and_utc()
}

/// A window parsed from caller-supplied date strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestedWindow {
    pub window: Window,
    pub granularity: Granularity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DateInput {
    Date(NaiveDate),
    Instant(DateTime<Utc>),
}

fn parse_date_input(raw: &str) -> Result<DateInput, String> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(DateInput::Date(date));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(DateInput::Instant(dt.with_timezone(&Utc)));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(DateInput::Instant(naive.and_utc()));
        }
    }
    Err(format!("invalid date: {raw:?}"))
}

impl RequestedWindow {
    /// Both inputs date-only → day granularity; anything else → hour granularity,
    /// with a date-only start/end pinned to the start/end of its day.
    pub fn parse(start: &str, end: &str) -> Result<Self, String> {
        let start = parse_date_input(start)?;
        let end = parse_date_input(end)?;
        let (window, granularity) = match (start, end) {
            (DateInput::Date(s), DateInput::Date(e)) => (Window::whole_days(s, e), Granularity::Day),
            (s, e) => {
                let start = match s {
                    DateInput::Date(d) => start_of_day(d),
                    DateInput::Instant(t) => t,
                };
                let end = match e {
                    DateInput::Date(d) => end_of_day(d),
                    DateInput::Instant(t) => t,
                };
                (Window::new(start, end), Granularity::Hour)
            }
        };
        Ok(Self { window, granularity })
    }

    pub fn days(first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            window: Window::whole_days(first, last),
            granularity: Granularity::Day,
        }
    }

    pub fn hours(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            window: Window::new(start, end),
            granularity: Granularity::Hour,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VehicleStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateCard {
    #[serde(rename = "dailyRate")]
    pub daily: u64,
    #[serde(rename = "monthlyRate")]
    pub monthly: u64,
    #[serde(rename = "hourlyRate", default)]
    pub hourly: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: Ulid,
    pub name: String,
    pub status: VehicleStatus,
    pub rates: RateCard,
}

impl Vehicle {
    pub fn is_bookable(&self) -> bool {
        self.status == VehicleStatus::Active
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentalDuration {
    pub months: u32,
    pub days: u32,
    pub hours: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub user_id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub granularity: Granularity,
    pub duration: RentalDuration,
    pub total_cost: u64,
    /// Rates in force when the cost was computed.
    pub rates: RateCard,
    pub paid: bool,
    pub status: ReservationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn window(&self) -> Window {
        Window::new(self.start_date, self.end_date)
    }

    /// `Mon Mar 03 2025 to Sat Mar 08 2025 (approved)`
    pub fn describe_window(&self) -> String {
        format!("{} ({})", self.window().display_days(), self.status)
    }
}

/// One telemetry reading in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionSample {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub status: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// WAL record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    VehicleRegistered(Vehicle),
    /// Full snapshot of a reservation after creation or any update.
    ReservationStored(Reservation),
    PositionRecorded {
        reservation_id: Ulid,
        sample: PositionSample,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictWindow {
    pub id: Ulid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: ReservationStatus,
}

impl From<&Reservation> for ConflictWindow {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            start_date: r.start_date,
            end_date: r.end_date,
            status: r.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<Reservation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingStats {
    pub total_revenue: u64,
    pub total_bookings: u64,
    pub total_cancelled: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedReservation {
    pub reservation: Reservation,
    /// Newest first.
    pub positions: Vec<PositionSample>,
    pub latest_position: Option<PositionSample>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn days(a: (i32, u32, u32), b: (i32, u32, u32)) -> Window {
        Window::whole_days(day(a.0, a.1, a.2), day(b.0, b.1, b.2))
    }

    #[test]
    fn whole_days_bounds() {
        let w = days((2025, 3, 1), (2025, 3, 10));
        assert_eq!(w.start, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(
            w.end,
            Utc.with_ymd_and_hms(2025, 3, 10, 23, 59, 59).unwrap() + chrono::TimeDelta::milliseconds(999)
        );
    }

    #[test]
    fn conflict_cases() {
        let request = days((2025, 3, 5), (2025, 3, 10));
        // existing starts inside
        assert!(days((2025, 3, 8), (2025, 3, 20)).conflicts_with(&request));
        // existing ends inside
        assert!(days((2025, 3, 1), (2025, 3, 6)).conflicts_with(&request));
        // existing encloses request
        assert!(days((2025, 3, 1), (2025, 3, 31)).conflicts_with(&request));
        // request encloses existing
        assert!(days((2025, 3, 6), (2025, 3, 7)).conflicts_with(&request));
        // disjoint on either side
        assert!(!days((2025, 2, 1), (2025, 3, 4)).conflicts_with(&request));
        assert!(!days((2025, 3, 11), (2025, 3, 12)).conflicts_with(&request));
    }

    #[test]
    fn touching_windows_conflict() {
        let existing = Window::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
        );
        let request = Window::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 3, 1, 14, 0, 0).unwrap(),
        );
        assert!(existing.conflicts_with(&request));
        assert!(request.conflicts_with(&existing));
    }

    #[test]
    fn four_cases_match_closed_overlap() {
        // Exhaustive over small day offsets.
        let base = day(2025, 1, 1);
        let at = |n: i64| base + chrono::TimeDelta::days(n);
        for a in 0..6 {
            for b in a..6 {
                for c in 0..6 {
                    for d in c..6 {
                        let x = Window::whole_days(at(a), at(b));
                        let y = Window::whole_days(at(c), at(d));
                        let closed = x.start <= y.end && y.start <= x.end;
                        assert_eq!(x.conflicts_with(&y), closed, "{a}..{b} vs {c}..{d}");
                    }
                }
            }
        }
    }

    #[test]
    fn status_transitions() {
        use ReservationStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Ongoing));
        assert!(Ongoing.can_transition_to(Completed));
        assert!(Ongoing.can_transition_to(Cancelled));
        assert!(!Ongoing.can_transition_to(Rejected));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Approved.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Approved));
        assert_eq!(ReservationStatus::sources_of(Cancelled), vec![Pending, Approved, Ongoing]);
        assert_eq!(ReservationStatus::sources_of(Rejected), vec![Pending, Approved]);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in ["pending", "approved", "ongoing", "completed", "rejected", "cancelled"] {
            let parsed: ReservationStatus = s.parse().unwrap();
            assert_eq!(parsed.as_str(), s);
        }
        assert!("paused".parse::<ReservationStatus>().is_err());
    }

    #[test]
    fn parse_date_only_window() {
        let rw = RequestedWindow::parse("2025-03-01", "2025-03-10").unwrap();
        assert_eq!(rw.granularity, Granularity::Day);
        assert_eq!(rw.window, days((2025, 3, 1), (2025, 3, 10)));
    }

    #[test]
    fn parse_hour_window() {
        let rw = RequestedWindow::parse("2025-03-01T10:00", "2025-03-01T16:30:00Z").unwrap();
        assert_eq!(rw.granularity, Granularity::Hour);
        assert_eq!(rw.window.start, Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap());
        assert_eq!(rw.window.end, Utc.with_ymd_and_hms(2025, 3, 1, 16, 30, 0).unwrap());
    }

    #[test]
    fn parse_mixed_window_pins_date_to_day_edge() {
        let rw = RequestedWindow::parse("2025-03-01T10:00", "2025-03-02").unwrap();
        assert_eq!(rw.granularity, Granularity::Hour);
        assert_eq!(rw.window.end, end_of_day(day(2025, 3, 2)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(RequestedWindow::parse("tomorrow", "2025-03-02").is_err());
        assert!(RequestedWindow::parse("2025-02-30", "2025-03-02").is_err());
    }

    #[test]
    fn display_matches_date_string_format() {
        let w = days((2025, 3, 5), (2025, 3, 8));
        assert_eq!(w.display_days(), "Wed Mar 05 2025 to Sat Mar 08 2025");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let now = Utc::now();
        let event = Event::ReservationStored(Reservation {
            id: Ulid::new(),
            vehicle_id: Ulid::new(),
            user_id: "u1".into(),
            start_date: now,
            end_date: now + chrono::TimeDelta::days(2),
            granularity: Granularity::Day,
            duration: RentalDuration { months: 0, days: 3, hours: 0 },
            total_cost: 3000,
            rates: RateCard { daily: 1000, monthly: 25000, hourly: None },
            paid: false,
            status: ReservationStatus::Pending,
            created_at: now,
            updated_at: now,
        });
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}

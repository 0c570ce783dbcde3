mod wal_store;

pub use wal_store::WalStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use crate::model::*;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("write-ahead log: {0}")]
    Io(#[from] std::io::Error),
    #[error("write-ahead log writer is shut down")]
    WriterClosed,
    #[error("record already exists: {0}")]
    Duplicate(Ulid),
}

/// Selection over reservations. Every populated field must match.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub vehicle_id: Option<Ulid>,
    pub user_id: Option<String>,
    pub statuses: Option<Vec<ReservationStatus>>,
    pub exclude_id: Option<Ulid>,
    /// Closed-interval overlap with this window.
    pub overlapping: Option<Window>,
    /// `start_date <= t`
    pub starts_by: Option<DateTime<Utc>>,
    /// `end_date <= t`
    pub ends_by: Option<DateTime<Utc>>,
    /// `created_at` inside this window.
    pub created_within: Option<Window>,
    pub paid: Option<bool>,
}

impl Filter {
    pub fn vehicle(mut self, id: Ulid) -> Self {
        self.vehicle_id = Some(id);
        self
    }

    pub fn user(mut self, id: impl Into<String>) -> Self {
        self.user_id = Some(id.into());
        self
    }

    pub fn statuses(mut self, statuses: &[ReservationStatus]) -> Self {
        self.statuses = Some(statuses.to_vec());
        self
    }

    pub fn excluding(mut self, id: Option<Ulid>) -> Self {
        self.exclude_id = id;
        self
    }

    pub fn overlapping(mut self, window: Window) -> Self {
        self.overlapping = Some(window);
        self
    }

    pub fn starts_by(mut self, t: DateTime<Utc>) -> Self {
        self.starts_by = Some(t);
        self
    }

    pub fn ends_by(mut self, t: DateTime<Utc>) -> Self {
        self.ends_by = Some(t);
        self
    }

    pub fn created_within(mut self, window: Window) -> Self {
        self.created_within = Some(window);
        self
    }

    pub fn paid(mut self, paid: bool) -> Self {
        self.paid = Some(paid);
        self
    }

    pub fn matches(&self, r: &Reservation) -> bool {
        self.vehicle_id.is_none_or(|v| r.vehicle_id == v)
            && self.user_id.as_ref().is_none_or(|u| &r.user_id == u)
            && self.statuses.as_ref().is_none_or(|s| s.contains(&r.status))
            && self.exclude_id.is_none_or(|x| r.id != x)
            && self.overlapping.is_none_or(|w| r.window().conflicts_with(&w))
            && self.starts_by.is_none_or(|t| r.start_date <= t)
            && self.ends_by.is_none_or(|t| r.end_date <= t)
            && self.created_within.is_none_or(|w| w.contains_instant(r.created_at))
            && self.paid.is_none_or(|p| r.paid == p)
    }
}

/// Field changes applied by `update_many` / `find_by_id_and_update`.
#[derive(Debug, Clone, Default)]
pub struct Patch {
    pub status: Option<ReservationStatus>,
    pub vehicle_id: Option<Ulid>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub granularity: Option<Granularity>,
    pub duration: Option<RentalDuration>,
    pub total_cost: Option<u64>,
    pub rates: Option<RateCard>,
    pub paid: Option<bool>,
}

impl Patch {
    pub fn status(status: ReservationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.vehicle_id.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.granularity.is_none()
            && self.duration.is_none()
            && self.total_cost.is_none()
            && self.rates.is_none()
            && self.paid.is_none()
    }

    pub fn apply(&self, r: &mut Reservation, now: DateTime<Utc>) {
        if let Some(v) = self.status {
            r.status = v;
        }
        if let Some(v) = self.vehicle_id {
            r.vehicle_id = v;
        }
        if let Some(v) = self.start_date {
            r.start_date = v;
        }
        if let Some(v) = self.end_date {
            r.end_date = v;
        }
        if let Some(v) = self.granularity {
            r.granularity = v;
        }
        if let Some(v) = self.duration {
            r.duration = v;
        }
        if let Some(v) = self.total_cost {
            r.total_cost = v;
        }
        if let Some(v) = self.rates {
            r.rates = v;
        }
        if let Some(v) = self.paid {
            r.paid = v;
        }
        r.updated_at = now;
    }
}

/// Result of a conditional single-record write.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalUpdate {
    Updated(Reservation),
    /// The record exists but its status was not one of the expected ones.
    /// Carries the record as it currently stands.
    StatusMismatch(Reservation),
    NotFound,
}

/// Reservation persistence. Implementations own atomicity: a conditional
/// update re-reads the current status and writes only if it still matches.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Matching reservations ordered by start date.
    async fn find(&self, filter: &Filter) -> Result<Vec<Reservation>, StoreError>;

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Reservation>, StoreError>;

    async fn create(&self, reservation: Reservation) -> Result<Reservation, StoreError>;

    /// Apply `patch` to every record matching `filter` as one step.
    /// Returns the updated records.
    async fn update_many(
        &self,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Apply `patch` to one record if its status is in `expected` (any status
    /// when `None`).
    async fn find_by_id_and_update(
        &self,
        id: Ulid,
        patch: &Patch,
        expected: Option<&[ReservationStatus]>,
    ) -> Result<ConditionalUpdate, StoreError>;

    async fn append_position(
        &self,
        reservation_id: Ulid,
        sample: PositionSample,
    ) -> Result<(), StoreError>;

    /// Newest first, at most `limit`.
    async fn positions(
        &self,
        reservation_id: Ulid,
        limit: usize,
    ) -> Result<Vec<PositionSample>, StoreError>;
}

#[async_trait]
pub trait VehicleDirectory: Send + Sync {
    async fn find_vehicle_by_id(&self, id: Ulid) -> Result<Option<Vehicle>, StoreError>;
}

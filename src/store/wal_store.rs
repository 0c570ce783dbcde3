use std::collections::VecDeque;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use ulid::Ulid;

use super::{ConditionalUpdate, Filter, Patch, ReservationStore, StoreError, VehicleDirectory};
use crate::limits::MAX_POSITIONS_PER_RESERVATION;
use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    /// Events of one logical write; durable together or not at all.
    Append {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Vec<Event>, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Drains every queued append into one batch and fsyncs once.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (events, response) = match cmd {
            WalCommand::Append { events, response } => (events, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<Pending> = vec![(events, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { events, response }) => batch.push((events, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::error!("wal flush failed: {e}");
        }
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }
        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[Pending]) -> io::Result<()> {
    let appended = batch
        .iter()
        .flat_map(|(events, _)| events)
        .try_for_each(|e| wal.append_buffered(e));
    // Flush even after a failed append so stray bytes don't ride the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed out of order")));
        }
    }
}

/// Interval store kept in memory and made durable through the WAL.
///
/// Every write holds `write_lock` from the moment it reads current state until
/// the WAL has acknowledged the new state, so conditional updates are atomic.
pub struct WalStore {
    reservations: DashMap<Ulid, Reservation>,
    vehicles: DashMap<Ulid, Vehicle>,
    positions: DashMap<Ulid, VecDeque<PositionSample>>,
    write_lock: Mutex<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl WalStore {
    /// Replay `path` and start the writer task. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let wal = Wal::open(path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            reservations: DashMap::new(),
            vehicles: DashMap::new(),
            positions: DashMap::new(),
            write_lock: Mutex::new(()),
            wal_tx,
        };
        let replayed = events.len();
        for event in events {
            store.apply(event);
        }
        tracing::info!(
            "replayed {replayed} wal events: {} vehicles, {} reservations",
            store.vehicles.len(),
            store.reservations.len()
        );
        Ok(store)
    }

    fn apply(&self, event: Event) {
        match event {
            Event::VehicleRegistered(v) => {
                self.vehicles.insert(v.id, v);
            }
            Event::ReservationStored(r) => {
                self.reservations.insert(r.id, r);
            }
            Event::PositionRecorded { reservation_id, sample } => {
                let mut history = self.positions.entry(reservation_id).or_default();
                history.push_back(sample);
                while history.len() > MAX_POSITIONS_PER_RESERVATION {
                    history.pop_front();
                }
            }
        }
    }

    async fn wal_append(&self, events: Vec<Event>) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append { events, response: tx })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)??;
        Ok(())
    }

    /// Persist then publish.
    async fn commit(&self, events: Vec<Event>) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        self.wal_append(events.clone()).await?;
        for event in events {
            self.apply(event);
        }
        Ok(())
    }

    /// Add or replace a vehicle.
    pub async fn register_vehicle(&self, vehicle: Vehicle) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.commit(vec![Event::VehicleRegistered(vehicle)]).await
    }

    /// Register `vehicle` unless an identical record is already stored.
    /// Returns whether anything was written.
    pub async fn sync_vehicle(&self, vehicle: Vehicle) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.vehicles.get(&vehicle.id).is_some_and(|v| *v == vehicle) {
            return Ok(false);
        }
        self.commit(vec![Event::VehicleRegistered(vehicle)]).await?;
        Ok(true)
    }

    /// Returns false when the vehicle is unknown.
    pub async fn set_vehicle_status(
        &self,
        id: Ulid,
        status: VehicleStatus,
    ) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut vehicle) = self.vehicles.get(&id).map(|v| v.clone()) else {
            return Ok(false);
        };
        vehicle.status = status;
        self.commit(vec![Event::VehicleRegistered(vehicle)]).await?;
        Ok(true)
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    /// Rewrite the log as one event per live record.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut events: Vec<Event> = self
            .vehicles
            .iter()
            .map(|v| Event::VehicleRegistered(v.clone()))
            .collect();
        events.extend(self.reservations.iter().map(|r| Event::ReservationStored(r.clone())));
        for entry in self.positions.iter() {
            events.extend(entry.iter().map(|s| Event::PositionRecorded {
                reservation_id: *entry.key(),
                sample: s.clone(),
            }));
        }
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)??;
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> Result<u64, StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| StoreError::WriterClosed)?;
        rx.await.map_err(|_| StoreError::WriterClosed)
    }

    fn sorted(mut found: Vec<Reservation>) -> Vec<Reservation> {
        found.sort_by(|a, b| a.start_date.cmp(&b.start_date).then(a.id.cmp(&b.id)));
        found
    }
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn find(&self, filter: &Filter) -> Result<Vec<Reservation>, StoreError> {
        let found = self
            .reservations
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| r.clone())
            .collect();
        Ok(Self::sorted(found))
    }

    async fn find_by_id(&self, id: Ulid) -> Result<Option<Reservation>, StoreError> {
        Ok(self.reservations.get(&id).map(|r| r.clone()))
    }

    async fn create(&self, reservation: Reservation) -> Result<Reservation, StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.reservations.contains_key(&reservation.id) {
            return Err(StoreError::Duplicate(reservation.id));
        }
        self.commit(vec![Event::ReservationStored(reservation.clone())]).await?;
        Ok(reservation)
    }

    async fn update_many(
        &self,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<Vec<Reservation>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let now = Utc::now();
        let updated: Vec<Reservation> = self
            .reservations
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| {
                let mut next = r.clone();
                patch.apply(&mut next, now);
                next
            })
            .collect();
        self.commit(updated.iter().cloned().map(Event::ReservationStored).collect())
            .await?;
        Ok(Self::sorted(updated))
    }

    async fn find_by_id_and_update(
        &self,
        id: Ulid,
        patch: &Patch,
        expected: Option<&[ReservationStatus]>,
    ) -> Result<ConditionalUpdate, StoreError> {
        let _guard = self.write_lock.lock().await;
        let Some(mut current) = self.reservations.get(&id).map(|r| r.clone()) else {
            return Ok(ConditionalUpdate::NotFound);
        };
        if let Some(expected) = expected
            && !expected.contains(&current.status)
        {
            return Ok(ConditionalUpdate::StatusMismatch(current));
        }
        patch.apply(&mut current, Utc::now());
        self.commit(vec![Event::ReservationStored(current.clone())]).await?;
        Ok(ConditionalUpdate::Updated(current))
    }

    async fn append_position(
        &self,
        reservation_id: Ulid,
        sample: PositionSample,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.commit(vec![Event::PositionRecorded { reservation_id, sample }]).await
    }

    async fn positions(
        &self,
        reservation_id: Ulid,
        limit: usize,
    ) -> Result<Vec<PositionSample>, StoreError> {
        Ok(self
            .positions
            .get(&reservation_id)
            .map(|h| h.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl VehicleDirectory for WalStore {
    async fn find_vehicle_by_id(&self, id: Ulid) -> Result<Option<Vehicle>, StoreError> {
        Ok(self.vehicles.get(&id).map(|v| v.clone()))
    }
}

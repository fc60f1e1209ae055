use std::io;
use std::path::Path;
use std::sync::{Mutex, RwLock, RwLockReadGuard};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use thiserror::Error;
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    /// The row changed since it was read.
    #[error("stale write: {0}")]
    VersionMismatch(Ulid),
    /// Another live reservation holds the room for an overlapping span.
    #[error("overlaps reservation: {0}")]
    Overlap(Ulid),
    #[error("WAL error: {0}")]
    Wal(String),
}

/// A row together with its write version. Versions start at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

/// Storage contract the lifecycle service relies on.
///
/// Every write is a compare-and-swap against the version the caller read:
/// a stale write fails with [`StoreError::VersionMismatch`] and leaves the
/// row untouched. Inserts must refuse to double-book a room.
pub trait ReservationStore: Send + Sync {
    fn get_reservation(&self, id: &ReservationId) -> Option<Versioned<Reservation>>;

    fn insert_reservation(&self, reservation: Reservation) -> Result<u64, StoreError>;

    fn compare_and_swap(
        &self,
        expected_version: u64,
        action: Action,
        reservation: Reservation,
    ) -> Result<u64, StoreError>;

    fn delete_reservation(&self, id: &ReservationId, expected_version: u64) -> Result<(), StoreError>;

    /// Pending and confirmed reservations, for the scheduler.
    fn live_reservations(&self) -> Vec<Reservation>;

    fn get_ban(&self, user_id: &UserId) -> Option<Versioned<BanRecord>>;

    /// `expected_version` is `None` when the caller saw no record.
    fn put_ban(&self, expected_version: Option<u64>, record: BanRecord) -> Result<u64, StoreError>;

    /// Flag a no-show and fold it into the owner's ban record in one write.
    /// Both versions are checked first; either both rows change or neither
    /// does. Returns the new reservation version.
    fn record_no_show(
        &self,
        expected_version: u64,
        action: Action,
        reservation: Reservation,
        ban_version: Option<u64>,
        record: BanRecord,
    ) -> Result<u64, StoreError>;
}

/// DashMap-backed store with an optional write-ahead log.
///
/// Lock order is always: compaction gate, then a map shard, then the WAL.
pub struct InMemoryStore {
    reservations: DashMap<ReservationId, Versioned<Reservation>>,
    bans: DashMap<UserId, Versioned<BanRecord>>,
    /// Room → reservation ids, used for the overlap check on insert.
    by_room: DashMap<RoomId, Vec<ReservationId>>,
    wal: Option<Mutex<Wal>>,
    /// Writers share it; compaction takes it exclusively.
    gate: RwLock<()>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// A volatile store with no log.
    pub fn new() -> Self {
        Self {
            reservations: DashMap::new(),
            bans: DashMap::new(),
            by_room: DashMap::new(),
            wal: None,
            gate: RwLock::new(()),
        }
    }

    /// Replay the log at `path` and keep appending to it.
    pub fn open(path: &Path) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let mut store = Self::new();
        for event in &events {
            store.apply_event(event);
        }
        store.wal = Some(Mutex::new(Wal::open(path)?));
        info!(
            "replayed {} events: {} reservations, {} ban records",
            events.len(),
            store.reservations.len(),
            store.bans.len()
        );
        Ok(store)
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }

    fn apply_event(&self, event: &Event) {
        match event {
            Event::ReservationCreated { reservation } => {
                self.by_room.entry(reservation.room_id).or_default().push(reservation.id);
                self.reservations.insert(
                    reservation.id,
                    Versioned {
                        version: 1,
                        value: reservation.clone(),
                    },
                );
            }
            Event::ReservationUpdated { reservation, .. } => {
                if let Some(mut row) = self.reservations.get_mut(&reservation.id) {
                    row.version += 1;
                    row.value = reservation.clone();
                }
            }
            Event::ReservationDeleted { id } => {
                if let Some((_, row)) = self.reservations.remove(id)
                    && let Some(mut ids) = self.by_room.get_mut(&row.value.room_id)
                {
                    ids.retain(|r| r != id);
                }
            }
            Event::BanRecorded { record } => self.apply_ban(record),
            Event::NoShowRecorded {
                reservation, record, ..
            } => {
                if let Some(mut row) = self.reservations.get_mut(&reservation.id) {
                    row.version += 1;
                    row.value = reservation.clone();
                }
                self.apply_ban(record);
            }
        }
    }

    fn apply_ban(&self, record: &BanRecord) {
        let version = self.bans.get(&record.user_id).map_or(1, |b| b.version + 1);
        self.bans.insert(
            record.user_id,
            Versioned {
                version,
                value: record.clone(),
            },
        );
    }

    fn gate(&self) -> Result<RwLockReadGuard<'_, ()>, StoreError> {
        self.gate
            .read()
            .map_err(|_| StoreError::Wal("compaction gate poisoned".into()))
    }

    fn log(&self, event: &Event) -> Result<(), StoreError> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let mut wal = wal
            .lock()
            .map_err(|_| StoreError::Wal("WAL lock poisoned".into()))?;
        wal.append(event).map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub fn wal_appends_since_compact(&self) -> u64 {
        self.wal
            .as_ref()
            .and_then(|w| w.lock().ok().map(|w| w.appends_since_compact()))
            .unwrap_or(0)
    }

    /// Events that recreate the current state.
    pub fn snapshot_events(&self) -> Vec<Event> {
        let mut events: Vec<Event> = self
            .reservations
            .iter()
            .map(|row| Event::ReservationCreated {
                reservation: row.value.clone(),
            })
            .collect();
        events.extend(self.bans.iter().map(|row| Event::BanRecorded {
            record: row.value.clone(),
        }));
        events
    }

    /// Rewrite the log as a snapshot. Writers are held off for the duration.
    pub fn compact(&self) -> Result<(), StoreError> {
        let Some(wal) = &self.wal else {
            return Ok(());
        };
        let _exclusive = self
            .gate
            .write()
            .map_err(|_| StoreError::Wal("compaction gate poisoned".into()))?;
        let events = self.snapshot_events();
        let mut wal = wal
            .lock()
            .map_err(|_| StoreError::Wal("WAL lock poisoned".into()))?;
        wal.compact(&events).map_err(|e| StoreError::Wal(e.to_string()))
    }
}

impl ReservationStore for InMemoryStore {
    fn get_reservation(&self, id: &ReservationId) -> Option<Versioned<Reservation>> {
        self.reservations.get(id).map(|row| row.value().clone())
    }

    fn insert_reservation(&self, reservation: Reservation) -> Result<u64, StoreError> {
        let _gate = self.gate()?;
        // Holding the room entry serializes inserts for the same room.
        let mut room = self.by_room.entry(reservation.room_id).or_default();
        if self.reservations.contains_key(&reservation.id) {
            return Err(StoreError::AlreadyExists(reservation.id));
        }
        let wanted = reservation.span;
        for other_id in room.iter() {
            if let Some(other) = self.reservations.get(other_id) {
                let o = &other.value;
                if o.is_live() && o.start() < o.effective_end() {
                    let held = Span::new(o.start(), o.effective_end());
                    if held.overlaps(&wanted) {
                        return Err(StoreError::Overlap(o.id));
                    }
                }
            }
        }

        self.log(&Event::ReservationCreated {
            reservation: reservation.clone(),
        })?;
        room.push(reservation.id);
        self.reservations.insert(
            reservation.id,
            Versioned {
                version: 1,
                value: reservation,
            },
        );
        Ok(1)
    }

    fn compare_and_swap(
        &self,
        expected_version: u64,
        action: Action,
        reservation: Reservation,
    ) -> Result<u64, StoreError> {
        let _gate = self.gate()?;
        let mut row = self
            .reservations
            .get_mut(&reservation.id)
            .ok_or(StoreError::NotFound(reservation.id))?;
        if row.version != expected_version {
            return Err(StoreError::VersionMismatch(reservation.id));
        }
        self.log(&Event::ReservationUpdated {
            action,
            reservation: reservation.clone(),
        })?;
        row.version += 1;
        row.value = reservation;
        Ok(row.version)
    }

    fn delete_reservation(&self, id: &ReservationId, expected_version: u64) -> Result<(), StoreError> {
        let _gate = self.gate()?;
        let room_id = match self.reservations.entry(*id) {
            Entry::Occupied(row) => {
                if row.get().version != expected_version {
                    return Err(StoreError::VersionMismatch(*id));
                }
                self.log(&Event::ReservationDeleted { id: *id })?;
                row.remove().value.room_id
            }
            Entry::Vacant(_) => return Err(StoreError::NotFound(*id)),
        };
        if let Some(mut ids) = self.by_room.get_mut(&room_id) {
            ids.retain(|r| r != id);
        }
        Ok(())
    }

    fn live_reservations(&self) -> Vec<Reservation> {
        self.reservations
            .iter()
            .filter(|row| row.value.is_live())
            .map(|row| row.value.clone())
            .collect()
    }

    fn get_ban(&self, user_id: &UserId) -> Option<Versioned<BanRecord>> {
        self.bans.get(user_id).map(|row| row.value().clone())
    }

    fn put_ban(&self, expected_version: Option<u64>, record: BanRecord) -> Result<u64, StoreError> {
        let _gate = self.gate()?;
        let user_id = record.user_id;
        match self.bans.entry(user_id) {
            Entry::Occupied(mut row) => {
                if expected_version != Some(row.get().version) {
                    return Err(StoreError::VersionMismatch(user_id));
                }
                self.log(&Event::BanRecorded { record: record.clone() })?;
                let row = row.get_mut();
                row.version += 1;
                row.value = record;
                Ok(row.version)
            }
            Entry::Vacant(slot) => {
                if expected_version.is_some() {
                    return Err(StoreError::VersionMismatch(user_id));
                }
                self.log(&Event::BanRecorded { record: record.clone() })?;
                slot.insert(Versioned {
                    version: 1,
                    value: record,
                });
                Ok(1)
            }
        }
    }

    fn record_no_show(
        &self,
        expected_version: u64,
        action: Action,
        reservation: Reservation,
        ban_version: Option<u64>,
        record: BanRecord,
    ) -> Result<u64, StoreError> {
        let _gate = self.gate()?;
        // Reservation shard before ban shard; nothing takes them the other way.
        let mut row = self
            .reservations
            .get_mut(&reservation.id)
            .ok_or(StoreError::NotFound(reservation.id))?;
        if row.version != expected_version {
            return Err(StoreError::VersionMismatch(reservation.id));
        }
        let user_id = record.user_id;
        let event = Event::NoShowRecorded {
            action,
            reservation: reservation.clone(),
            record: record.clone(),
        };
        match self.bans.entry(user_id) {
            Entry::Occupied(mut ban) => {
                if ban_version != Some(ban.get().version) {
                    return Err(StoreError::VersionMismatch(user_id));
                }
                self.log(&event)?;
                let ban = ban.get_mut();
                ban.version += 1;
                ban.value = record;
            }
            Entry::Vacant(slot) => {
                if ban_version.is_some() {
                    return Err(StoreError::VersionMismatch(user_id));
                }
                self.log(&event)?;
                slot.insert(Versioned {
                    version: 1,
                    value: record,
                });
            }
        }
        row.version += 1;
        row.value = reservation;
        Ok(row.version)
    }
}

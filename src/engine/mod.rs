mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
#[cfg(test)]
mod tests;

pub use availability::{
    decide, free_slots, merge_line_items, merge_overlapping, subtract_intervals, Decision, Rejection,
};
pub use error::EngineError;
pub use mutations::{Registration, SpacePatch, UserPatch, CANCELLED_BY_USER};

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::auth::PasswordPolicy;
use crate::model::*;
use crate::notify::{Change, ChangeKind, NotifyHub};
use crate::wal::Wal;

/// Everything bookable about one space: its record, the equipment it stocks
/// with each ceiling, and every reservation ever made against it.
#[derive(Debug, Clone)]
pub struct SpaceState {
    pub space: Space,
    pub equipment: HashMap<String, u32>,
    /// Sorted by (date, start).
    pub reservations: Vec<Reservation>,
    /// Set once the space is deleted; writers still holding the Arc back off.
    pub(super) removed: bool,
}

impl SpaceState {
    pub fn new(space: Space) -> Self {
        Self {
            space,
            equipment: HashMap::new(),
            reservations: Vec::new(),
            removed: false,
        }
    }

    /// Ceiling for an equipment kind here; 0 when not stocked.
    pub fn capacity_of(&self, equipment_id: &str) -> u32 {
        self.equipment.get(equipment_id).copied().unwrap_or(0)
    }

    /// All reservations on `date`, any status, by start time.
    pub fn on_date(&self, date: NaiveDate) -> impl Iterator<Item = &Reservation> {
        let from = self.reservations.partition_point(|r| r.date < date);
        self.reservations[from..].iter().take_while(move |r| r.date == date)
    }

    pub fn has_active_reservations(&self) -> bool {
        self.reservations.iter().any(Reservation::is_active)
    }

    pub fn find(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    fn insert_reservation(&mut self, reservation: Reservation) {
        let key = (reservation.date, reservation.span.start);
        let pos = self
            .reservations
            .partition_point(|r| (r.date, r.span.start) <= key);
        self.reservations.insert(pos, reservation);
    }

    fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }
}

pub type SharedSpaceState = Arc<RwLock<SpaceState>>;

/// Who is asking. `System` is the process itself (seeding, bootstrap).
#[derive(Debug, Clone)]
pub enum Actor {
    System,
    User(User),
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        match self {
            Actor::System => true,
            Actor::User(u) => u.is_admin(),
        }
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Actor::System => None,
            Actor::User(u) => Some(u),
        }
    }

    pub(super) fn require_admin(&self, what: &'static str) -> Result<(), EngineError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(EngineError::Forbidden(what))
        }
    }

    pub(super) fn require_user(&self) -> Result<&User, EngineError> {
        self.user()
            .ok_or(EngineError::Forbidden("this action needs a signed-in account"))
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit:
/// take one append, drain whatever else is already queued, fsync once,
/// answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for {} events: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so partial bytes never ride along
    // with the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

pub struct Engine {
    pub(super) spaces: DashMap<String, SharedSpaceState>,
    pub(super) equipment: DashMap<String, EquipmentKind>,
    pub(super) users: DashMap<Ulid, User>,
    /// Lower-cased email → user id.
    pub(super) emails: DashMap<String, Ulid>,
    pub(super) favorites: DashMap<Ulid, HashSet<String>>,
    /// Reservation id → space id.
    pub(super) reservation_to_space: DashMap<Ulid, String>,
    /// Serializes account writes so email uniqueness holds.
    pub(super) accounts: Mutex<()>,
    /// Serializes creation and removal of spaces and equipment kinds.
    pub(super) catalog: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) passwords: PasswordPolicy,
}

/// Apply a space-local event. Caller holds the space's write lock.
/// Returns the reservation change it produced, if any.
fn apply_to_space(
    ss: &mut SpaceState,
    event: &Event,
    index: &DashMap<Ulid, String>,
) -> Option<Change> {
    match event {
        Event::SpaceUpdated { space } => {
            ss.space = space.clone();
            for r in &mut ss.reservations {
                r.space_name = space.name.clone();
            }
            None
        }
        Event::EquipmentLinked { equipment_id, quantity, .. } => {
            ss.equipment.insert(equipment_id.clone(), *quantity);
            None
        }
        Event::EquipmentUnlinked { equipment_id, .. } => {
            ss.equipment.remove(equipment_id);
            None
        }
        Event::ReservationCreated { reservation } => {
            index.insert(reservation.id, reservation.space_id.clone());
            ss.insert_reservation(reservation.clone());
            Some(Change::reservation(ChangeKind::Added, reservation.clone()))
        }
        Event::ReservationStatusChanged { id, status, reason, .. } => {
            let r = ss.reservations.iter_mut().find(|r| r.id == *id)?;
            r.status = *status;
            r.rejection_reason = reason.clone();
            Some(Change::reservation(ChangeKind::Modified, r.clone()))
        }
        Event::ReservationDeleted { id, .. } => {
            index.remove(id);
            let removed = ss.remove_reservation(*id)?;
            Some(Change::reservation(ChangeKind::Removed, removed))
        }
        _ => None,
    }
}

/// The space a space-local event belongs to.
fn event_space_id(event: &Event) -> Option<&str> {
    match event {
        Event::SpaceUpdated { space } => Some(&space.id),
        Event::EquipmentLinked { space_id, .. }
        | Event::EquipmentUnlinked { space_id, .. }
        | Event::ReservationStatusChanged { space_id, .. }
        | Event::ReservationDeleted { space_id, .. } => Some(space_id),
        Event::ReservationCreated { reservation } => Some(&reservation.space_id),
        _ => None,
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        passwords: PasswordPolicy,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            spaces: DashMap::new(),
            equipment: DashMap::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
            favorites: DashMap::new(),
            reservation_to_space: DashMap::new(),
            accounts: Mutex::new(()),
            catalog: Mutex::new(()),
            wal_tx,
            notify,
            passwords,
        };

        // Sole owner of every Arc here, so try_write never contends.
        for event in &events {
            if let Some(space_id) = event_space_id(event) {
                if let Some(entry) = engine.spaces.get(space_id) {
                    let shared = entry.clone();
                    drop(entry);
                    if let Ok(mut guard) = shared.try_write() {
                        apply_to_space(&mut guard, event, &engine.reservation_to_space);
                    }
                }
            } else {
                engine.apply_global(event);
            }
        }
        tracing::info!(
            "replayed {} events: {} spaces, {} users, {} reservations",
            events.len(),
            engine.spaces.len(),
            engine.users.len(),
            engine.reservation_to_space.len()
        );

        Ok(engine)
    }

    /// Apply an event that touches no single space's lock.
    fn apply_global(&self, event: &Event) -> Option<Change> {
        match event {
            Event::SpaceCreated { space } => {
                self.spaces.insert(
                    space.id.clone(),
                    Arc::new(RwLock::new(SpaceState::new(space.clone()))),
                );
                None
            }
            Event::SpaceDeleted { id } => {
                self.spaces.remove(id);
                self.reservation_to_space.retain(|_, space_id| space_id != id);
                for mut favs in self.favorites.iter_mut() {
                    favs.remove(id);
                }
                None
            }
            Event::EquipmentAdded { kind } => {
                self.equipment.insert(kind.id.clone(), kind.clone());
                None
            }
            Event::UserRegistered { user } => {
                self.emails.insert(user.email.to_lowercase(), user.id);
                self.users.insert(user.id, user.clone());
                Some(Change::user(ChangeKind::Added, user.clone()))
            }
            Event::UserUpdated { user } => {
                self.users.insert(user.id, user.clone());
                Some(Change::user(ChangeKind::Modified, user.clone()))
            }
            Event::UserDeleted { id } => {
                self.favorites.remove(id);
                let (_, user) = self.users.remove(id)?;
                self.emails.remove(&user.email.to_lowercase());
                Some(Change::user(ChangeKind::Removed, user))
            }
            Event::FavoriteSet { user_id, space_id, favorite } => {
                let mut favs = self.favorites.entry(*user_id).or_default();
                if *favorite {
                    favs.insert(space_id.clone());
                } else {
                    favs.remove(space_id);
                }
                None
            }
            _ => None,
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_space_state(&self, id: &str) -> Option<SharedSpaceState> {
        self.spaces.get(id).map(|e| e.value().clone())
    }

    pub fn space_for_reservation(&self, id: &Ulid) -> Option<String> {
        self.reservation_to_space.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply + notify for an event scoped to one space.
    pub(super) async fn persist_and_apply(
        &self,
        ss: &mut SpaceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        if let Some(change) = apply_to_space(ss, event, &self.reservation_to_space) {
            self.notify.send(change);
        }
        Ok(())
    }

    /// WAL-append + apply + notify for a catalog or account event.
    pub(super) async fn persist_global(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        if let Some(change) = self.apply_global(event) {
            self.notify.send(change);
        }
        Ok(())
    }

    /// Lookup reservation → space, acquire that space's write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<SpaceState>, EngineError> {
        let space_id = self
            .space_for_reservation(id)
            .ok_or_else(|| EngineError::NotFound("reservation", id.to_string()))?;
        let shared = self
            .get_space_state(&space_id)
            .ok_or(EngineError::NotFound("space", space_id))?;
        Ok(shared.write_owned().await)
    }
}

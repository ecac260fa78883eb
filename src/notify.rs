use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Reservation, ReservationStatus, User};

const CHANNEL_CAPACITY: usize = 256;

/// Default window after subscribing during which additions are ignored.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Reservations,
    Users,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Reservation(Reservation),
    User(User),
}

/// One committed change to a reservation or an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub kind: ChangeKind,
    pub record: Record,
}

impl Change {
    pub fn reservation(kind: ChangeKind, reservation: Reservation) -> Self {
        Self { kind, record: Record::Reservation(reservation) }
    }

    pub fn user(kind: ChangeKind, user: User) -> Self {
        Self { kind, record: Record::User(user) }
    }

    pub fn topic(&self) -> Topic {
        match self.record {
            Record::Reservation(_) => Topic::Reservations,
            Record::User(_) => Topic::Users,
        }
    }
}

/// Which slice of the change stream a subscriber cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    /// Every change to reservations owned by this user.
    OwnReservations(Ulid),
    /// Newly created pending reservations.
    PendingRequests,
    /// The account record of this user.
    Account(Ulid),
}

impl Filter {
    pub fn topic(&self) -> Topic {
        match self {
            Filter::OwnReservations(_) | Filter::PendingRequests => Topic::Reservations,
            Filter::Account(_) => Topic::Users,
        }
    }

    pub fn matches(&self, change: &Change) -> bool {
        match (self, &change.record) {
            (Filter::OwnReservations(user_id), Record::Reservation(r)) => r.user_id == *user_id,
            (Filter::PendingRequests, Record::Reservation(r)) => {
                change.kind == ChangeKind::Added && r.status == ReservationStatus::Pending
            }
            (Filter::Account(user_id), Record::User(u)) => u.id == *user_id,
            _ => false,
        }
    }
}

/// Broadcast hub for committed changes, one channel per topic.
pub struct NotifyHub {
    channels: DashMap<Topic, broadcast::Sender<Change>>,
    grace: Duration,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self::with_grace(DEFAULT_GRACE)
    }

    pub fn with_grace(grace: Duration) -> Self {
        Self {
            channels: DashMap::new(),
            grace,
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Raw receiver for a topic. Creates the channel if needed.
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Change> {
        let sender = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a change. No-op if nobody is listening.
    pub fn send(&self, change: Change) {
        if let Some(sender) = self.channels.get(&change.topic()) {
            let _ = sender.send(change);
        }
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

/// A filtered change stream that starts with the current matching records.
///
/// Additions seen within the grace window after opening are dropped, so the
/// initial snapshot never reads as a burst of new events.
pub struct Subscription {
    filter: Filter,
    rx: broadcast::Receiver<Change>,
    backlog: VecDeque<Change>,
    opened_at: Instant,
    grace: Duration,
}

impl Subscription {
    pub fn new(
        filter: Filter,
        rx: broadcast::Receiver<Change>,
        snapshot: Vec<Change>,
        grace: Duration,
    ) -> Self {
        Self {
            filter,
            rx,
            backlog: snapshot.into(),
            opened_at: Instant::now(),
            grace,
        }
    }

    fn admit(&self, change: &Change) -> bool {
        if !self.filter.matches(change) {
            return false;
        }
        !(change.kind == ChangeKind::Added && self.opened_at.elapsed() < self.grace)
    }

    /// Wait for the next admitted change. `None` once the hub is gone.
    pub async fn next(&mut self) -> Option<Change> {
        while let Some(change) = self.backlog.pop_front() {
            if self.admit(&change) {
                return Some(change);
            }
        }
        loop {
            match self.rx.recv().await {
                Ok(change) if self.admit(&change) => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("subscriber lagged, {n} changes dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next admitted change if one is already waiting.
    #[cfg(test)]
    pub(crate) fn try_next(&mut self) -> Option<Change> {
        while let Some(change) = self.backlog.pop_front() {
            if self.admit(&change) {
                return Some(change);
            }
        }
        loop {
            match self.rx.try_recv() {
                Ok(change) if self.admit(&change) => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    tracing::warn!("subscriber lagged, {n} changes dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

//! Turns observed record changes into short user-facing alerts.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::engine::{Engine, EngineError};
use crate::model::{Reservation, ReservationStatus, User};
use crate::notify::{Change, ChangeKind, Filter, Record, Subscription};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
}

impl Alert {
    fn new(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            message: message.into(),
        }
    }

    /// JSON body carried by a NOTIFY message.
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// LISTEN channel names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// A standard user's own reservations.
    Reservations,
    /// New pending requests, for administrators.
    Requests,
    /// The signed-in account's approval flag.
    Account,
}

impl Channel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reservations" => Some(Channel::Reservations),
            "requests" => Some(Channel::Requests),
            "account" => Some(Channel::Account),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Reservations => "reservations",
            Channel::Requests => "requests",
            Channel::Account => "account",
        }
    }
}

/// Alert for a change to one of the user's own reservations.
pub fn reservation_alert(kind: ChangeKind, r: &Reservation) -> Option<Alert> {
    match (kind, r.status) {
        (ChangeKind::Modified, ReservationStatus::Cancelled) => {
            let reason = r.rejection_reason.as_deref().filter(|s| !s.is_empty())?;
            Some(Alert::new("Reservation rejected", format!("Reason: {reason}")))
        }
        (ChangeKind::Modified, ReservationStatus::Approved) => Some(Alert::new(
            "Reservation approved",
            format!("Your request for {} was accepted.", r.space_name),
        )),
        (ChangeKind::Added, ReservationStatus::Approved) => Some(Alert::new(
            "New assignment",
            format!("An administrator assigned you: {}", r.space_name),
        )),
        (ChangeKind::Removed, _) => Some(Alert::new(
            "Reservation deleted",
            format!("Your reservation for {} was deleted.", r.space_name),
        )),
        _ => None,
    }
}

/// Alert for administrators when a request arrives.
pub fn request_alert(kind: ChangeKind, r: &Reservation) -> Option<Alert> {
    (kind == ChangeKind::Added && r.status == ReservationStatus::Pending)
        .then(|| Alert::new("New request", format!("Pending: {}", r.space_name)))
}

/// Tracks the approval flag of one account between observations.
#[derive(Debug, Default)]
pub struct AccountWatch {
    approved: Option<bool>,
}

impl AccountWatch {
    pub fn observe(&mut self, user: &User) -> Option<Alert> {
        let previous = self.approved.replace(user.approved)?;
        match (previous, user.approved) {
            (false, true) => Some(Alert::new(
                "Account approved",
                "An administrator approved your access.",
            )),
            (true, false) => Some(Alert::new(
                "Account suspended",
                "An administrator revoked your access.",
            )),
            _ => None,
        }
    }
}

/// Turns the changes of one channel into alerts.
struct Translator {
    channel: Channel,
    account: AccountWatch,
}

impl Translator {
    fn translate(&mut self, change: &Change) -> Option<Alert> {
        match (&change.record, self.channel) {
            (Record::Reservation(r), Channel::Reservations) => reservation_alert(change.kind, r),
            (Record::Reservation(r), Channel::Requests) => request_alert(change.kind, r),
            (Record::User(u), Channel::Account) if change.kind != ChangeKind::Removed => {
                self.account.observe(u)
            }
            _ => None,
        }
    }
}

/// Keep a subscription drained into the session's own queue, so a quiet
/// session never falls behind the shared broadcast ring.
async fn pump(mut sub: Subscription, mut translator: Translator, tx: mpsc::UnboundedSender<Alert>) {
    while let Some(change) = sub.next().await {
        if let Some(alert) = translator.translate(&change)
            && tx.send(alert).is_err()
        {
            break;
        }
    }
}

/// One LISTEN registration of a signed-in user. Dropping it stops the
/// background task feeding it.
pub struct Listener {
    channel: Channel,
    alerts: mpsc::UnboundedReceiver<Alert>,
    task: JoinHandle<()>,
}

impl Listener {
    pub async fn open(engine: &Engine, channel: Channel, user: &User) -> Result<Self, EngineError> {
        let filter = match channel {
            Channel::Reservations if user.is_admin() => {
                return Err(EngineError::Forbidden(
                    "administrators listen on requests, not reservations",
                ));
            }
            Channel::Reservations => Filter::OwnReservations(user.id),
            Channel::Requests if !user.is_admin() => {
                return Err(EngineError::Forbidden("only administrators listen on requests"));
            }
            Channel::Requests => Filter::PendingRequests,
            Channel::Account => Filter::Account(user.id),
        };
        let mut account = AccountWatch::default();
        if channel == Channel::Account {
            account.observe(user);
        }
        let sub = engine.subscribe(filter).await;
        let (tx, alerts) = mpsc::unbounded_channel();
        let task = tokio::spawn(pump(sub, Translator { channel, account }, tx));
        Ok(Self {
            channel,
            alerts,
            task,
        })
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Alerts queued since the last call.
    pub fn poll(&mut self) -> Vec<Alert> {
        let mut alerts = Vec::new();
        while let Ok(alert) = self.alerts.try_recv() {
            alerts.push(alert);
        }
        alerts
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.task.abort();
    }
}

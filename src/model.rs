use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for creation timestamps.
pub type Ms = i64;

/// Minutes since midnight, the only time-of-day type.
pub type Minutes = u32;

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minutes,
    pub end: Minutes,
}

impl Span {
    pub fn new(start: Minutes, end: Minutes) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Minutes {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpaceCategory {
    Room,
    Lab,
    Workshop,
    Studio,
    Auditorium,
    MeetingRoom,
}

impl SpaceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpaceCategory::Room => "room",
            SpaceCategory::Lab => "lab",
            SpaceCategory::Workshop => "workshop",
            SpaceCategory::Studio => "studio",
            SpaceCategory::Auditorium => "auditorium",
            SpaceCategory::MeetingRoom => "meeting_room",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "room" | "classroom" => Some(SpaceCategory::Room),
            "lab" | "laboratory" => Some(SpaceCategory::Lab),
            "workshop" => Some(SpaceCategory::Workshop),
            "studio" => Some(SpaceCategory::Studio),
            "auditorium" => Some(SpaceCategory::Auditorium),
            "meeting_room" => Some(SpaceCategory::MeetingRoom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Space {
    pub id: String,
    pub name: String,
    pub category: SpaceCategory,
    pub capacity: u32,
    pub location: String,
    pub description: String,
    /// False while the space is out of service (maintenance).
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquipmentKind {
    pub id: String,
    pub name: String,
}

/// Equipment stocked in a space together with its ceiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceEquipment {
    pub space_id: String,
    pub equipment_id: String,
    pub name: String,
    pub quantity: u32,
}

// ── Users ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Standard,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Standard => "standard",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "student" => Some(Role::Standard),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub last_name: String,
    pub email: String,
    /// PHC-format scrypt hash.
    pub password_hash: String,
    pub role: Role,
    pub institutional_id: String,
    pub approved: bool,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Unapproved standard accounts may not sign in; administrators always may.
    pub fn may_sign_in(&self) -> bool {
        self.approved || self.is_admin()
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Pending,
    Approved,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Pending => "pending",
            ReservationStatus::Approved => "approved",
            ReservationStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Some(ReservationStatus::Pending),
            "approved" => Some(ReservationStatus::Approved),
            "cancelled" | "canceled" => Some(ReservationStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub equipment_id: String,
    pub equipment_name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub space_id: String,
    pub space_name: String,
    /// Empty means the whole space is reserved.
    pub items: Vec<LineItem>,
    pub date: NaiveDate,
    pub span: Span,
    pub status: ReservationStatus,
    pub purpose: String,
    pub rejection_reason: Option<String>,
    pub created_at: Ms,
}

impl Reservation {
    pub fn is_whole_space(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.status != ReservationStatus::Cancelled
    }

    /// Quantity of one equipment kind committed by this reservation.
    pub fn committed(&self, equipment_id: &str) -> u32 {
        self.items
            .iter()
            .filter(|i| i.equipment_id == equipment_id)
            .map(|i| i.quantity)
            .sum()
    }
}

/// What a caller asks for. Times are still text; the engine parses them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub space_id: String,
    pub date: NaiveDate,
    pub start: String,
    pub end: String,
    pub items: Vec<(String, u32)>,
    pub purpose: String,
}

/// Outcome of a weekly recurring request. Granted dates stay booked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RecurringOutcome {
    pub granted: Vec<Ulid>,
    pub conflicts: Vec<(NaiveDate, String)>,
    /// Date and error that stopped the series after some dates were booked.
    /// Later dates were not attempted.
    pub failed: Option<(NaiveDate, String)>,
}

// ── WAL record format ────────────────────────────────────────────

/// Flat event list, one per durable mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SpaceCreated { space: Space },
    SpaceUpdated { space: Space },
    SpaceDeleted { id: String },
    EquipmentAdded { kind: EquipmentKind },
    EquipmentLinked { space_id: String, equipment_id: String, quantity: u32 },
    EquipmentUnlinked { space_id: String, equipment_id: String },
    UserRegistered { user: User },
    UserUpdated { user: User },
    UserDeleted { id: Ulid },
    ReservationCreated { reservation: Reservation },
    ReservationStatusChanged {
        id: Ulid,
        space_id: String,
        status: ReservationStatus,
        reason: Option<String>,
    },
    ReservationDeleted { id: Ulid, space_id: String },
    FavoriteSet { user_id: Ulid, space_id: String, favorite: bool },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Statistics {
    pub total: usize,
    /// (space name, reservation count)
    pub most_requested: Option<(String, usize)>,
    pub approved_hours: u32,
    pub pending: usize,
    pub approved: usize,
    pub cancelled: usize,
}

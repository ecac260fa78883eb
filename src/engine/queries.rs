use std::collections::HashMap;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;
use crate::notify::{Change, ChangeKind, Filter, Subscription};
use crate::time::END_OF_DAY;

use super::availability::{decide, free_slots, Decision};
use super::conflict::{overlapping, parse_span};
use super::{Actor, Engine, EngineError};

impl Engine {
    // ── Catalog ──────────────────────────────────────────────

    pub async fn get_space(&self, id: &str) -> Option<Space> {
        let shared = self.get_space_state(id)?;
        let guard = shared.read().await;
        Some(guard.space.clone())
    }

    /// All spaces, sorted by name.
    pub async fn list_spaces(&self) -> Vec<Space> {
        let shared: Vec<_> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut spaces = Vec::with_capacity(shared.len());
        for s in shared {
            spaces.push(s.read().await.space.clone());
        }
        spaces.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        spaces
    }

    pub fn list_equipment(&self) -> Vec<EquipmentKind> {
        let mut kinds: Vec<_> = self.equipment.iter().map(|e| e.value().clone()).collect();
        kinds.sort_by(|a, b| a.id.cmp(&b.id));
        kinds
    }

    /// Equipment stocked in a space, with display names.
    pub async fn space_equipment(&self, space_id: &str) -> Result<Vec<SpaceEquipment>, EngineError> {
        let shared = self
            .get_space_state(space_id)
            .ok_or_else(|| EngineError::NotFound("space", space_id.to_string()))?;
        let guard = shared.read().await;
        let mut stocked: Vec<SpaceEquipment> = guard
            .equipment
            .iter()
            .map(|(equipment_id, quantity)| SpaceEquipment {
                space_id: space_id.to_string(),
                equipment_id: equipment_id.clone(),
                name: self
                    .equipment
                    .get(equipment_id)
                    .map(|k| k.name.clone())
                    .unwrap_or_else(|| equipment_id.clone()),
                quantity: *quantity,
            })
            .collect();
        stocked.sort_by(|a, b| a.equipment_id.cmp(&b.equipment_id));
        Ok(stocked)
    }

    pub fn spaces_count(&self) -> usize {
        self.spaces.len()
    }

    pub fn equipment_count(&self) -> usize {
        self.equipment.len()
    }

    // ── Accounts ─────────────────────────────────────────────

    pub fn get_user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|u| u.value().clone())
    }

    pub fn list_users(&self, actor: &Actor) -> Result<Vec<User>, EngineError> {
        actor.require_admin("only administrators list accounts")?;
        let mut users: Vec<_> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    /// Favorite space ids of a user, sorted.
    pub fn favorites(&self, user_id: &Ulid) -> Vec<String> {
        let mut ids: Vec<String> = self
            .favorites
            .get(user_id)
            .map(|f| f.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    // ── Reservations ─────────────────────────────────────────

    async fn collect_reservations(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let shared: Vec<_> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for s in shared {
            let guard = s.read().await;
            out.extend(guard.reservations.iter().filter(|r| keep(r)).cloned());
        }
        out
    }

    pub async fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        let space_id = self.space_for_reservation(id)?;
        let shared = self.get_space_state(&space_id)?;
        let guard = shared.read().await;
        guard.find(*id).cloned()
    }

    /// A user's reservations, newest first. Without `include_history` only
    /// pending and approved ones are returned.
    pub async fn reservations_for_user(&self, user_id: Ulid, include_history: bool) -> Vec<Reservation> {
        let mut list = self
            .collect_reservations(|r| r.user_id == user_id && (include_history || r.is_active()))
            .await;
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        list
    }

    /// Non-cancelled reservations of a space on one date, by start time.
    pub async fn day_agenda(&self, space_id: &str, date: NaiveDate) -> Result<Vec<Reservation>, EngineError> {
        let shared = self
            .get_space_state(space_id)
            .ok_or_else(|| EngineError::NotFound("space", space_id.to_string()))?;
        let guard = shared.read().await;
        Ok(guard.on_date(date).filter(|r| r.is_active()).cloned().collect())
    }

    /// Pending reservations, oldest first.
    pub async fn pending_reservations(&self, actor: &Actor) -> Result<Vec<Reservation>, EngineError> {
        actor.require_admin("only administrators review requests")?;
        let mut list = self
            .collect_reservations(|r| r.status == ReservationStatus::Pending)
            .await;
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(list)
    }

    pub async fn all_reservations(&self, actor: &Actor) -> Result<Vec<Reservation>, EngineError> {
        actor.require_admin("only administrators list every reservation")?;
        let mut list = self.collect_reservations(|_| true).await;
        list.sort_by(|a, b| (a.date, a.span.start, a.id).cmp(&(b.date, b.span.start, b.id)));
        Ok(list)
    }

    /// Dry run of the admission rules. Nothing is written.
    pub async fn check_availability(
        &self,
        request: &ReservationRequest,
    ) -> Result<Decision, EngineError> {
        let span = parse_span(&request.start, &request.end)?;
        let items = self.line_items(&request.items)?;
        let shared = self
            .get_space_state(&request.space_id)
            .ok_or_else(|| EngineError::NotFound("space", request.space_id.clone()))?;
        let guard = shared.read().await;
        let candidate = Reservation {
            id: Ulid::nil(),
            user_id: Ulid::nil(),
            space_id: request.space_id.clone(),
            space_name: guard.space.name.clone(),
            items,
            date: request.date,
            span,
            status: ReservationStatus::Pending,
            purpose: String::new(),
            rejection_reason: None,
            created_at: 0,
        };
        Ok(decide(&candidate.items, overlapping(&guard, &candidate), |eq| {
            guard.capacity_of(eq)
        }))
    }

    /// Windows of `date` in which the whole space is free.
    pub async fn free_slots(&self, space_id: &str, date: NaiveDate) -> Result<Vec<Span>, EngineError> {
        let shared = self
            .get_space_state(space_id)
            .ok_or_else(|| EngineError::NotFound("space", space_id.to_string()))?;
        let guard = shared.read().await;
        let busy: Vec<Span> = guard
            .on_date(date)
            .filter(|r| r.is_active())
            .map(|r| r.span)
            .collect();
        Ok(free_slots(Span::new(0, END_OF_DAY), &busy))
    }

    pub async fn statistics(&self, actor: &Actor) -> Result<Statistics, EngineError> {
        actor.require_admin("only administrators view statistics")?;
        let all = self.collect_reservations(|_| true).await;

        let mut stats = Statistics {
            total: all.len(),
            ..Statistics::default()
        };
        let mut by_space: HashMap<&str, usize> = HashMap::new();
        let mut approved_minutes: u64 = 0;
        for r in &all {
            *by_space.entry(r.space_name.as_str()).or_default() += 1;
            match r.status {
                ReservationStatus::Pending => stats.pending += 1,
                ReservationStatus::Approved => {
                    stats.approved += 1;
                    approved_minutes += u64::from(r.span.duration());
                }
                ReservationStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats.most_requested = by_space
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, count)| (name.to_string(), count));
        stats.approved_hours = u32::try_from(approved_minutes / 60).unwrap_or(u32::MAX);
        Ok(stats)
    }

    // ── Live changes ─────────────────────────────────────────

    /// Open a change stream. The receiver is attached before the snapshot is
    /// taken, so no change between the two is lost.
    pub async fn subscribe(&self, filter: Filter) -> Subscription {
        let rx = self.notify.subscribe(filter.topic());
        let snapshot = match filter {
            Filter::OwnReservations(user_id) => self
                .collect_reservations(|r| r.user_id == user_id)
                .await,
            Filter::PendingRequests => self
                .collect_reservations(|r| r.status == ReservationStatus::Pending)
                .await,
            Filter::Account(_) => Vec::new(),
        };
        let mut backlog: Vec<Change> = snapshot
            .into_iter()
            .map(|r| Change::reservation(ChangeKind::Added, r))
            .collect();
        if let Filter::Account(user_id) = filter
            && let Some(user) = self.get_user(&user_id)
        {
            backlog.push(Change::user(ChangeKind::Added, user));
        }
        Subscription::new(filter, rx, backlog, self.notify.grace())
    }
}

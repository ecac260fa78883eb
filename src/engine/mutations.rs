use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::auth::PasswordPolicy;
use crate::limits::*;
use crate::model::*;
use crate::time::weekly_dates;

use super::availability::merge_line_items;
use super::conflict::{check_no_conflict, now_ms, parse_span, validate_id, validate_text};
use super::{Actor, Engine, EngineError, SpaceState, WalCommand};

/// Reason recorded when an owner cancels their own reservation.
pub const CANCELLED_BY_USER: &str = "Cancelled by the user";

/// Fields a new account supplies.
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: String,
    pub last_name: String,
    pub institutional_id: String,
}

/// Partial edit of an account. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub last_name: Option<String>,
    pub approved: Option<bool>,
    pub role: Option<Role>,
}

/// Partial edit of a space. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct SpacePatch {
    pub name: Option<String>,
    pub category: Option<SpaceCategory>,
    pub capacity: Option<u32>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

impl SpacePatch {
    fn apply(self, space: &mut Space) {
        if let Some(v) = self.name {
            space.name = v;
        }
        if let Some(v) = self.category {
            space.category = v;
        }
        if let Some(v) = self.capacity {
            space.capacity = v;
        }
        if let Some(v) = self.location {
            space.location = v;
        }
        if let Some(v) = self.description {
            space.description = v;
        }
        if let Some(v) = self.active {
            space.active = v;
        }
    }
}

fn validate_space(space: &Space) -> Result<(), EngineError> {
    validate_id(&space.id)?;
    if space.name.trim().is_empty() {
        return Err(EngineError::Invalid("space name must not be empty".into()));
    }
    validate_text(&space.name, MAX_NAME_LEN, "space name too long")?;
    validate_text(&space.location, MAX_NAME_LEN, "location too long")?;
    validate_text(&space.description, MAX_TEXT_LEN, "description too long")
}

fn validate_email(email: &str) -> Result<(), EngineError> {
    validate_text(email, MAX_EMAIL_LEN, "email too long")?;
    let Some((local, domain)) = email.split_once('@') else {
        return Err(EngineError::Invalid(format!("not an email address: {email}")));
    };
    if local.is_empty() || domain.is_empty() || email.contains(char::is_whitespace) {
        return Err(EngineError::Invalid(format!("not an email address: {email}")));
    }
    Ok(())
}

/// Fold one date of a recurring series into its report. Returns whether to
/// go on. A hard failure before anything was booked is the caller's error;
/// after that it is recorded so the granted ids are still reported.
pub(super) fn tally(
    outcome: &mut RecurringOutcome,
    date: NaiveDate,
    result: Result<Reservation, EngineError>,
) -> Result<bool, EngineError> {
    match result {
        Ok(r) => outcome.granted.push(r.id),
        Err(EngineError::Unavailable(reason)) => outcome.conflicts.push((date, reason.to_string())),
        Err(e) if outcome.granted.is_empty() => return Err(e),
        Err(e) => {
            outcome.failed = Some((date, e.to_string()));
            return Ok(false);
        }
    }
    Ok(true)
}

impl Engine {
    // ── Spaces ───────────────────────────────────────────────

    pub async fn create_space(&self, actor: &Actor, mut space: Space) -> Result<Space, EngineError> {
        actor.require_admin("only administrators manage spaces")?;
        if space.id.is_empty() {
            space.id = Ulid::new().to_string().to_lowercase();
        }
        validate_space(&space)?;

        let _catalog = self.catalog.lock().await;
        if self.spaces.contains_key(&space.id) {
            return Err(EngineError::AlreadyExists("space", space.id));
        }
        if self.spaces.len() >= MAX_SPACES {
            return Err(EngineError::LimitExceeded("too many spaces"));
        }
        self.persist_global(&Event::SpaceCreated { space: space.clone() })
            .await?;
        tracing::info!("space {} created", space.id);
        Ok(space)
    }

    /// Edits are applied to the stored record under the space's write lock,
    /// so concurrent patches touching different fields both land.
    pub async fn update_space(
        &self,
        actor: &Actor,
        id: &str,
        patch: SpacePatch,
    ) -> Result<Space, EngineError> {
        actor.require_admin("only administrators manage spaces")?;
        let shared = self
            .get_space_state(id)
            .ok_or_else(|| EngineError::NotFound("space", id.to_string()))?;
        let mut guard = shared.write().await;
        if guard.removed {
            return Err(EngineError::NotFound("space", id.to_string()));
        }
        let mut space = guard.space.clone();
        patch.apply(&mut space);
        validate_space(&space)?;
        self.persist_and_apply(&mut guard, &Event::SpaceUpdated { space: space.clone() })
            .await?;
        Ok(space)
    }

    /// Refused while any non-cancelled reservation still references the space.
    pub async fn delete_space(&self, actor: &Actor, id: &str) -> Result<(), EngineError> {
        actor.require_admin("only administrators manage spaces")?;
        let _catalog = self.catalog.lock().await;
        let shared = self
            .get_space_state(id)
            .ok_or_else(|| EngineError::NotFound("space", id.to_string()))?;
        let mut guard = shared.write().await;
        if guard.has_active_reservations() {
            return Err(EngineError::HasReservations(id.to_string()));
        }
        self.persist_global(&Event::SpaceDeleted { id: id.to_string() })
            .await?;
        guard.removed = true;
        tracing::info!("space {id} deleted");
        Ok(())
    }

    // ── Equipment ────────────────────────────────────────────

    pub async fn add_equipment_kind(
        &self,
        actor: &Actor,
        kind: EquipmentKind,
    ) -> Result<(), EngineError> {
        actor.require_admin("only administrators manage equipment")?;
        validate_id(&kind.id)?;
        validate_text(&kind.name, MAX_NAME_LEN, "equipment name too long")?;

        let _catalog = self.catalog.lock().await;
        if self.equipment.contains_key(&kind.id) {
            return Err(EngineError::AlreadyExists("equipment", kind.id));
        }
        if self.equipment.len() >= MAX_EQUIPMENT_KINDS {
            return Err(EngineError::LimitExceeded("too many equipment kinds"));
        }
        self.persist_global(&Event::EquipmentAdded { kind }).await
    }

    /// Stock `quantity` of an equipment kind in a space, replacing any earlier
    /// ceiling. Lowering it below what is already committed is allowed.
    pub async fn link_equipment(
        &self,
        actor: &Actor,
        space_id: &str,
        equipment_id: &str,
        quantity: u32,
    ) -> Result<(), EngineError> {
        actor.require_admin("only administrators manage equipment")?;
        if quantity == 0 {
            return Err(EngineError::Invalid("quantity must be at least 1".into()));
        }
        if quantity > MAX_ITEM_QUANTITY {
            return Err(EngineError::LimitExceeded("quantity too large"));
        }
        if !self.equipment.contains_key(equipment_id) {
            return Err(EngineError::NotFound("equipment", equipment_id.to_string()));
        }
        let shared = self
            .get_space_state(space_id)
            .ok_or_else(|| EngineError::NotFound("space", space_id.to_string()))?;
        let mut guard = shared.write().await;
        if guard.removed {
            return Err(EngineError::NotFound("space", space_id.to_string()));
        }
        let event = Event::EquipmentLinked {
            space_id: space_id.to_string(),
            equipment_id: equipment_id.to_string(),
            quantity,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn unlink_equipment(
        &self,
        actor: &Actor,
        space_id: &str,
        equipment_id: &str,
    ) -> Result<(), EngineError> {
        actor.require_admin("only administrators manage equipment")?;
        let shared = self
            .get_space_state(space_id)
            .ok_or_else(|| EngineError::NotFound("space", space_id.to_string()))?;
        let mut guard = shared.write().await;
        if guard.removed {
            return Err(EngineError::NotFound("space", space_id.to_string()));
        }
        if !guard.equipment.contains_key(equipment_id) {
            return Err(EngineError::NotFound(
                "equipment link",
                format!("{space_id}/{equipment_id}"),
            ));
        }
        let event = Event::EquipmentUnlinked {
            space_id: space_id.to_string(),
            equipment_id: equipment_id.to_string(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Reservations ─────────────────────────────────────────

    /// Resolve requested equipment against the catalog, folding repeats.
    pub(super) fn line_items(&self, requested: &[(String, u32)]) -> Result<Vec<LineItem>, EngineError> {
        if requested.len() > MAX_LINE_ITEMS {
            return Err(EngineError::LimitExceeded("too many line items"));
        }
        let mut items = Vec::with_capacity(requested.len());
        for (equipment_id, quantity) in requested {
            if *quantity == 0 {
                return Err(EngineError::Invalid(format!(
                    "quantity for {equipment_id} must be at least 1"
                )));
            }
            if *quantity > MAX_ITEM_QUANTITY {
                return Err(EngineError::LimitExceeded("quantity too large"));
            }
            let kind = self
                .equipment
                .get(equipment_id)
                .ok_or_else(|| EngineError::NotFound("equipment", equipment_id.clone()))?;
            items.push(LineItem {
                equipment_id: kind.id.clone(),
                equipment_name: kind.name.clone(),
                quantity: *quantity,
            });
        }
        Ok(merge_line_items(items))
    }

    /// Everything about a candidate that does not need the space lock.
    fn draft(
        &self,
        user: &User,
        request: &ReservationRequest,
        status: ReservationStatus,
    ) -> Result<Reservation, EngineError> {
        let span = parse_span(&request.start, &request.end)?;
        validate_text(&request.purpose, MAX_TEXT_LEN, "purpose too long")?;
        Ok(Reservation {
            id: Ulid::new(),
            user_id: user.id,
            space_id: request.space_id.clone(),
            space_name: String::new(),
            items: self.line_items(&request.items)?,
            date: request.date,
            span,
            status,
            purpose: request.purpose.clone(),
            rejection_reason: None,
            created_at: now_ms(),
        })
    }

    /// Decide and, on a grant, persist. Caller holds the space's write lock,
    /// so nothing can slip in between the check and the write.
    async fn admit(
        &self,
        ss: &mut SpaceState,
        mut candidate: Reservation,
    ) -> Result<Reservation, EngineError> {
        if ss.removed {
            return Err(EngineError::NotFound("space", candidate.space_id));
        }
        if !ss.space.active {
            return Err(EngineError::Inactive(candidate.space_id));
        }
        if ss.reservations.len() >= MAX_RESERVATIONS_PER_SPACE {
            return Err(EngineError::LimitExceeded("too many reservations for this space"));
        }
        candidate.space_name = ss.space.name.clone();
        check_no_conflict(ss, &candidate)?;
        self.persist_and_apply(ss, &Event::ReservationCreated { reservation: candidate.clone() })
            .await?;
        Ok(candidate)
    }

    /// Book a space (no items) or some of its equipment. Requests from
    /// administrators start approved; everyone else's start pending.
    pub async fn create_reservation(
        &self,
        actor: &Actor,
        request: ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        let user = actor.require_user()?;
        let status = if user.is_admin() {
            ReservationStatus::Approved
        } else {
            ReservationStatus::Pending
        };
        let candidate = self.draft(user, &request, status)?;
        let shared = self
            .get_space_state(&request.space_id)
            .ok_or_else(|| EngineError::NotFound("space", request.space_id.clone()))?;
        let mut guard = shared.write().await;
        let result = self.admit(&mut guard, candidate).await;
        match &result {
            Ok(r) => {
                metrics::counter!(crate::observability::RESERVATIONS_GRANTED_TOTAL).increment(1);
                tracing::debug!("reservation {} granted on {}", r.id, r.space_id);
            }
            Err(EngineError::Unavailable(reason)) => {
                metrics::counter!(crate::observability::RESERVATIONS_REJECTED_TOTAL).increment(1);
                tracing::debug!("reservation on {} refused: {reason}", request.space_id);
            }
            Err(_) => {}
        }
        result
    }

    /// Same request repeated weekly from `request.date` through `until`.
    /// Each date is decided on its own; granted dates stay booked even when
    /// others conflict.
    pub async fn create_recurring(
        &self,
        actor: &Actor,
        request: ReservationRequest,
        until: NaiveDate,
    ) -> Result<RecurringOutcome, EngineError> {
        actor.require_admin("only administrators create recurring reservations")?;
        let user = actor.require_user()?;
        let dates = weekly_dates(request.date, until);
        if dates.is_empty() {
            return Err(EngineError::Invalid(
                "repeat end date is before the first occurrence".into(),
            ));
        }
        if dates.len() > MAX_RECURRING_OCCURRENCES {
            return Err(EngineError::LimitExceeded("too many weekly occurrences"));
        }
        let template = self.draft(user, &request, ReservationStatus::Approved)?;
        let shared = self
            .get_space_state(&request.space_id)
            .ok_or_else(|| EngineError::NotFound("space", request.space_id.clone()))?;

        let mut outcome = RecurringOutcome::default();
        let mut guard = shared.write().await;
        for date in dates {
            let candidate = Reservation {
                id: Ulid::new(),
                date,
                ..template.clone()
            };
            let result = self.admit(&mut guard, candidate).await;
            if !tally(&mut outcome, date, result)? {
                break;
            }
        }
        if let Some((date, error)) = &outcome.failed {
            tracing::warn!(
                "recurring booking on {} stopped at {date}: {error}",
                request.space_id
            );
        }
        tracing::info!(
            "recurring booking on {}: {} granted, {} conflicts",
            request.space_id,
            outcome.granted.len(),
            outcome.conflicts.len()
        );
        Ok(outcome)
    }

    async fn set_status(
        &self,
        id: Ulid,
        check: impl FnOnce(&Reservation) -> Result<(), EngineError>,
        status: ReservationStatus,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard
            .find(id)
            .ok_or_else(|| EngineError::NotFound("reservation", id.to_string()))?;
        check(current)?;
        let event = Event::ReservationStatusChanged {
            id,
            space_id: current.space_id.clone(),
            status,
            reason,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn approve_reservation(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        actor.require_admin("only administrators approve reservations")?;
        self.set_status(
            id,
            |r| match r.status {
                ReservationStatus::Pending => Ok(()),
                from => Err(EngineError::InvalidTransition { from, action: "approve" }),
            },
            ReservationStatus::Approved,
            None,
        )
        .await
    }

    /// Administrator refusal: the reservation becomes cancelled with `reason`.
    pub async fn reject_reservation(
        &self,
        actor: &Actor,
        id: Ulid,
        reason: &str,
    ) -> Result<(), EngineError> {
        actor.require_admin("only administrators reject reservations")?;
        validate_text(reason, MAX_TEXT_LEN, "reason too long")?;
        self.set_status(
            id,
            |r| match r.status {
                ReservationStatus::Cancelled => Err(EngineError::InvalidTransition {
                    from: r.status,
                    action: "reject",
                }),
                _ => Ok(()),
            },
            ReservationStatus::Cancelled,
            Some(reason.to_string()),
        )
        .await
    }

    pub async fn cancel_reservation(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let user_id = actor.require_user()?.id;
        self.set_status(
            id,
            |r| {
                if r.user_id != user_id {
                    return Err(EngineError::Forbidden("only the owner can cancel a reservation"));
                }
                match r.status {
                    ReservationStatus::Cancelled => Err(EngineError::InvalidTransition {
                        from: r.status,
                        action: "cancel",
                    }),
                    _ => Ok(()),
                }
            },
            ReservationStatus::Cancelled,
            Some(CANCELLED_BY_USER.to_string()),
        )
        .await
    }

    /// Permanently remove a cancelled reservation (owner or administrator).
    pub async fn delete_reservation(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let mut guard = self.resolve_reservation_write(&id).await?;
        let current = guard
            .find(id)
            .ok_or_else(|| EngineError::NotFound("reservation", id.to_string()))?;
        let owner = actor.user().is_some_and(|u| u.id == current.user_id);
        if !owner && !actor.is_admin() {
            return Err(EngineError::Forbidden(
                "only the owner or an administrator can delete a reservation",
            ));
        }
        if current.status != ReservationStatus::Cancelled {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                action: "delete",
            });
        }
        let event = Event::ReservationDeleted {
            id,
            space_id: current.space_id.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Accounts ─────────────────────────────────────────────

    /// New accounts are standard and unapproved.
    pub async fn register_user(&self, registration: Registration) -> Result<User, EngineError> {
        self.insert_user(registration, Role::Standard, false).await
    }

    /// Create an approved administrator unless the email is already taken.
    pub async fn bootstrap_admin(&self, email: &str, password: &str) -> Result<bool, EngineError> {
        if self.emails.contains_key(&email.trim().to_lowercase()) {
            return Ok(false);
        }
        let registration = Registration {
            email: email.to_string(),
            password: password.to_string(),
            name: "Administrator".into(),
            last_name: String::new(),
            institutional_id: String::new(),
        };
        match self.insert_user(registration, Role::Admin, true).await {
            Ok(_) => Ok(true),
            Err(EngineError::AlreadyExists(..)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn insert_user(
        &self,
        registration: Registration,
        role: Role,
        approved: bool,
    ) -> Result<User, EngineError> {
        let email = registration.email.trim().to_string();
        validate_email(&email)?;
        validate_text(&registration.name, MAX_NAME_LEN, "name too long")?;
        validate_text(&registration.last_name, MAX_NAME_LEN, "last name too long")?;
        validate_text(&registration.institutional_id, MAX_ID_LEN, "institutional id too long")?;
        let password_hash = self.passwords.hash_blocking(registration.password).await?;

        let _accounts = self.accounts.lock().await;
        let key = email.to_lowercase();
        if self.emails.contains_key(&key) {
            return Err(EngineError::AlreadyExists("account", email));
        }
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many accounts"));
        }
        let user = User {
            id: Ulid::new(),
            name: registration.name,
            last_name: registration.last_name,
            email,
            password_hash,
            role,
            institutional_id: registration.institutional_id,
            approved,
        };
        self.persist_global(&Event::UserRegistered { user: user.clone() })
            .await?;
        tracing::info!("account {} registered", user.id);
        Ok(user)
    }

    /// Check credentials. Unapproved standard accounts are turned away even
    /// with the right password.
    pub fn login(&self, email: &str, password: &str) -> Result<User, EngineError> {
        let user = self
            .emails
            .get(&email.trim().to_lowercase())
            .and_then(|id| self.users.get(id.value()).map(|u| u.value().clone()))
            .ok_or(EngineError::BadCredentials)?;
        if !PasswordPolicy::verify(&user.password_hash, password) {
            return Err(EngineError::BadCredentials);
        }
        if !user.may_sign_in() {
            return Err(EngineError::PendingApproval);
        }
        Ok(user)
    }

    /// Apply a partial edit. Approval and role need an administrator; a user
    /// may change their own name fields. Promotion to admin also approves.
    pub async fn update_user(
        &self,
        actor: &Actor,
        id: Ulid,
        patch: UserPatch,
    ) -> Result<User, EngineError> {
        let is_self = actor.user().is_some_and(|u| u.id == id);
        if patch.approved.is_some() || patch.role.is_some() {
            actor.require_admin("only administrators change approval or role")?;
        } else if !is_self && !actor.is_admin() {
            return Err(EngineError::Forbidden("you can only edit your own profile"));
        }
        if let Some(name) = &patch.name {
            validate_text(name, MAX_NAME_LEN, "name too long")?;
        }
        if let Some(last_name) = &patch.last_name {
            validate_text(last_name, MAX_NAME_LEN, "last name too long")?;
        }

        let _accounts = self.accounts.lock().await;
        let mut user = self
            .users
            .get(&id)
            .map(|u| u.value().clone())
            .ok_or_else(|| EngineError::NotFound("account", id.to_string()))?;
        if let Some(name) = patch.name {
            user.name = name;
        }
        if let Some(last_name) = patch.last_name {
            user.last_name = last_name;
        }
        if let Some(approved) = patch.approved {
            user.approved = approved;
        }
        if let Some(role) = patch.role {
            user.role = role;
            if role == Role::Admin {
                user.approved = true;
            }
        }
        self.persist_global(&Event::UserUpdated { user: user.clone() })
            .await?;
        Ok(user)
    }

    pub async fn delete_user(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        actor.require_admin("only administrators delete accounts")?;
        let _accounts = self.accounts.lock().await;
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound("account", id.to_string()));
        }
        self.persist_global(&Event::UserDeleted { id }).await?;
        tracing::info!("account {id} deleted");
        Ok(())
    }

    // ── Favorites ────────────────────────────────────────────

    /// Flip a space in or out of the caller's favorites. Returns the new state.
    pub async fn toggle_favorite(&self, actor: &Actor, space_id: &str) -> Result<bool, EngineError> {
        let user_id = actor.require_user()?.id;
        if !self.spaces.contains_key(space_id) {
            return Err(EngineError::NotFound("space", space_id.to_string()));
        }
        let _accounts = self.accounts.lock().await;
        let favorite = !self
            .favorites
            .get(&user_id)
            .is_some_and(|f| f.contains(space_id));
        let event = Event::FavoriteSet {
            user_id,
            space_id: space_id.to_string(),
            favorite,
        };
        self.persist_global(&event).await?;
        Ok(favorite)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        // Hold the catalog and account locks so no global event lands between
        // snapshot and swap.
        let _catalog = self.catalog.lock().await;
        let _accounts = self.accounts.lock().await;

        for kind in self.equipment.iter() {
            events.push(Event::EquipmentAdded { kind: kind.value().clone() });
        }

        let mut spaces: Vec<_> = self
            .spaces
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        spaces.sort_by(|a, b| a.0.cmp(&b.0));
        let mut guards = Vec::with_capacity(spaces.len());
        for (_, shared) in &spaces {
            guards.push(shared.clone().read_owned().await);
        }
        for ss in &guards {
            events.push(Event::SpaceCreated { space: ss.space.clone() });
            let mut links: Vec<_> = ss.equipment.iter().collect();
            links.sort();
            for (equipment_id, quantity) in links {
                events.push(Event::EquipmentLinked {
                    space_id: ss.space.id.clone(),
                    equipment_id: equipment_id.clone(),
                    quantity: *quantity,
                });
            }
        }

        for user in self.users.iter() {
            events.push(Event::UserRegistered { user: user.value().clone() });
        }
        for favs in self.favorites.iter() {
            for space_id in favs.value() {
                events.push(Event::FavoriteSet {
                    user_id: *favs.key(),
                    space_id: space_id.clone(),
                    favorite: true,
                });
            }
        }
        for ss in &guards {
            for r in &ss.reservations {
                events.push(Event::ReservationCreated { reservation: r.clone() });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

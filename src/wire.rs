use std::fmt::Debug;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::alerts::{Channel, Listener};
use crate::auth::ServiceAuthSource;
use crate::engine::{Actor, Decision, Engine, EngineError, SpacePatch, UserPatch};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, ReservationQuery};
use crate::time::{format_date, format_time_of_day};

/// Reason stored when an administrator cancels without giving one.
const DEFAULT_REJECTION_REASON: &str = "Rejected by an administrator";

static NEXT_PID: AtomicI32 = AtomicI32::new(1);

/// Per-connection state: who is signed in and what they listen to.
#[derive(Default)]
struct Session {
    user_id: Option<Ulid>,
    listeners: Vec<Listener>,
}

impl Session {
    fn sign_out(&mut self) {
        self.user_id = None;
        self.listeners.clear();
    }
}

pub struct SpacebookHandler {
    engine: Arc<Engine>,
    session: Mutex<Session>,
    pid: i32,
    query_parser: Arc<SpacebookQueryParser>,
}

impl SpacebookHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            session: Mutex::new(Session::default()),
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            query_parser: Arc::new(SpacebookQueryParser),
        }
    }

    /// The signed-in account, re-read so role and approval changes apply
    /// to open sessions. A suspended or deleted account is signed out.
    fn current_user(&self, session: &mut Session) -> PgWireResult<User> {
        let id = session.user_id.ok_or_else(|| {
            user_error("42501", "not signed in: use LOGIN 'email' 'password'".into())
        })?;
        match self.engine.get_user(&id) {
            Some(user) if user.may_sign_in() => Ok(user),
            Some(_) => {
                session.sign_out();
                Err(engine_err(EngineError::PendingApproval))
            }
            None => {
                session.sign_out();
                Err(user_error("42501", "account no longer exists".into()))
            }
        }
    }

    /// Run one statement and deliver queued alerts ahead of its response.
    async fn run<C>(&self, client: &mut C, query: &str) -> PgWireResult<Response>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let started = Instant::now();
        let mut session = self.session.lock().await;
        let cmd = match sql::parse_sql(query) {
            Ok(cmd) => cmd,
            Err(e) => {
                metrics::counter!(observability::QUERIES_TOTAL, "command" => "invalid", "status" => "error")
                    .increment(1);
                return Err(sql_err(e));
            }
        };
        let label = observability::command_label(&cmd);
        self.flush_alerts(client, &mut session).await?;
        let result = self.execute_command(&mut session, cmd).await;
        self.flush_alerts(client, &mut session).await?;

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    /// Send every queued alert as a NotificationResponse.
    async fn flush_alerts<C>(&self, client: &mut C, session: &mut Session) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        for listener in &mut session.listeners {
            let channel = listener.channel().as_str();
            for alert in listener.poll() {
                metrics::counter!(observability::ALERTS_SENT_TOTAL, "channel" => channel).increment(1);
                client
                    .send(PgWireBackendMessage::NotificationResponse(NotificationResponse::new(
                        self.pid,
                        channel.to_string(),
                        alert.payload(),
                    )))
                    .await?;
            }
        }
        Ok(())
    }

    async fn execute_command(&self, session: &mut Session, cmd: Command) -> PgWireResult<Response> {
        let engine = &self.engine;
        match cmd {
            Command::Login { email, password } => {
                let engine = self.engine.clone();
                let user = tokio::task::spawn_blocking(move || engine.login(&email, &password))
                    .await
                    .map_err(|e| user_error("XX000", format!("login task failed: {e}")))?
                    .inspect_err(|_| {
                        metrics::counter!(observability::LOGIN_FAILURES_TOTAL).increment(1);
                    })
                    .map_err(engine_err)?;
                session.sign_out();
                session.user_id = Some(user.id);
                tracing::debug!("session {} signed in as {}", self.pid, user.id);
                Ok(rows(users_schema(), &[user], encode_user))
            }
            Command::Logout => {
                session.sign_out();
                Ok(Response::Execution(Tag::new("LOGOUT")))
            }
            Command::Listen { channel } => {
                let parsed = Channel::parse(&channel).ok_or_else(|| {
                    user_error(
                        "42601",
                        format!("unknown channel: {channel} (expected reservations, requests or account)"),
                    )
                })?;
                let user = self.current_user(session)?;
                let listener = Listener::open(engine, parsed, &user).await.map_err(engine_err)?;
                session.listeners.retain(|l| l.channel() != parsed);
                session.listeners.push(listener);
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                match channel.as_deref().map(Channel::parse) {
                    None => session.listeners.clear(),
                    Some(Some(c)) => session.listeners.retain(|l| l.channel() != c),
                    Some(None) => {}
                }
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }

            // ── Accounts ─────────────────────────────────────
            Command::InsertUser {
                email,
                password,
                name,
                last_name,
                institutional_id,
            } => {
                engine
                    .register_user(crate::engine::Registration {
                        email,
                        password,
                        name,
                        last_name,
                        institutional_id,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateUser { id, changes } => {
                let actor = Actor::User(self.current_user(session)?);
                let patch = UserPatch {
                    name: changes.name,
                    last_name: changes.last_name,
                    approved: changes.approved,
                    role: changes.role,
                };
                engine.update_user(&actor, id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteUser { id } => {
                let actor = Actor::User(self.current_user(session)?);
                engine.delete_user(&actor, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectUsers => {
                let actor = Actor::User(self.current_user(session)?);
                let users = engine.list_users(&actor).map_err(engine_err)?;
                Ok(rows(users_schema(), &users, encode_user))
            }

            // ── Catalog ──────────────────────────────────────
            Command::InsertSpace { space } => {
                let actor = Actor::User(self.current_user(session)?);
                engine.create_space(&actor, space).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UpdateSpace { id, changes } => {
                let actor = Actor::User(self.current_user(session)?);
                let patch = SpacePatch {
                    name: changes.name,
                    category: changes.category,
                    capacity: changes.capacity,
                    location: changes.location,
                    description: changes.description,
                    active: changes.active,
                };
                engine.update_space(&actor, &id, patch).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteSpace { id } => {
                let actor = Actor::User(self.current_user(session)?);
                engine.delete_space(&actor, &id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectSpaces { favorites_only } => {
                let user = self.current_user(session)?;
                let favorites = engine.favorites(&user.id);
                let listed: Vec<(Space, bool)> = engine
                    .list_spaces()
                    .await
                    .into_iter()
                    .map(|s| {
                        let fav = favorites.contains(&s.id);
                        (s, fav)
                    })
                    .filter(|(_, fav)| !favorites_only || *fav)
                    .collect();
                Ok(rows(spaces_schema(), &listed, encode_space))
            }
            Command::InsertEquipment { id, name } => {
                let actor = Actor::User(self.current_user(session)?);
                engine
                    .add_equipment_kind(&actor, EquipmentKind { id, name })
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectEquipment => {
                self.current_user(session)?;
                let kinds = engine.list_equipment();
                Ok(rows(equipment_schema(), &kinds, |enc, k| {
                    enc.encode_field(&k.id)?;
                    enc.encode_field(&k.name)
                }))
            }
            Command::LinkEquipment {
                space_id,
                equipment_id,
                quantity,
            } => {
                let actor = Actor::User(self.current_user(session)?);
                engine
                    .link_equipment(&actor, &space_id, &equipment_id, quantity)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::UnlinkEquipment {
                space_id,
                equipment_id,
            } => {
                let actor = Actor::User(self.current_user(session)?);
                engine
                    .unlink_equipment(&actor, &space_id, &equipment_id)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectSpaceEquipment { space_id } => {
                self.current_user(session)?;
                let stocked = engine.space_equipment(&space_id).await.map_err(engine_err)?;
                Ok(rows(space_equipment_schema(), &stocked, |enc, e| {
                    enc.encode_field(&e.space_id)?;
                    enc.encode_field(&e.equipment_id)?;
                    enc.encode_field(&e.name)?;
                    enc.encode_field(&i64::from(e.quantity))
                }))
            }
            Command::ToggleFavorite { space_id } => {
                let actor = Actor::User(self.current_user(session)?);
                let now_favorite = engine
                    .toggle_favorite(&actor, &space_id)
                    .await
                    .map_err(engine_err)?;
                let tag = if now_favorite { "INSERT" } else { "DELETE" };
                Ok(Response::Execution(Tag::new(tag).with_rows(1)))
            }
            Command::SelectFavorites => {
                let user = self.current_user(session)?;
                let mut listed = Vec::new();
                for space_id in engine.favorites(&user.id) {
                    if let Some(space) = engine.get_space(&space_id).await {
                        listed.push(space);
                    }
                }
                Ok(rows(favorites_schema(), &listed, |enc, s| {
                    enc.encode_field(&s.id)?;
                    enc.encode_field(&s.name)
                }))
            }

            // ── Reservations ─────────────────────────────────
            Command::InsertReservation {
                request,
                repeat_until: None,
            } => {
                let actor = Actor::User(self.current_user(session)?);
                let reservation = engine
                    .create_reservation(&actor, request)
                    .await
                    .map_err(engine_err)?;
                Ok(rows(reservations_schema(), &[reservation], encode_reservation))
            }
            Command::InsertReservation {
                request,
                repeat_until: Some(until),
            } => {
                let actor = Actor::User(self.current_user(session)?);
                let outcome = engine
                    .create_recurring(&actor, request, until)
                    .await
                    .map_err(engine_err)?;
                let mut lines = Vec::with_capacity(outcome.granted.len() + outcome.conflicts.len());
                for id in &outcome.granted {
                    if let Some(r) = engine.get_reservation(id).await {
                        lines.push((r.date, "granted", Some(r.id), None));
                    }
                }
                for (date, reason) in outcome.conflicts {
                    lines.push((date, "conflict", None, Some(reason)));
                }
                if let Some((date, error)) = outcome.failed {
                    lines.push((date, "failed", None, Some(error)));
                }
                lines.sort_by_key(|l| l.0);
                Ok(rows(recurring_schema(), &lines, |enc, (date, result, id, reason)| {
                    enc.encode_field(&format_date(*date))?;
                    enc.encode_field(result)?;
                    enc.encode_field(&id.map(|id| id.to_string()))?;
                    enc.encode_field(reason)
                }))
            }
            Command::UpdateReservation { id, status, reason } => {
                let user = self.current_user(session)?;
                let actor = Actor::User(user.clone());
                match status {
                    ReservationStatus::Approved => {
                        engine.approve_reservation(&actor, id).await.map_err(engine_err)?;
                    }
                    ReservationStatus::Cancelled => {
                        let owner = engine
                            .get_reservation(&id)
                            .await
                            .map(|r| r.user_id)
                            .ok_or_else(|| engine_err(EngineError::NotFound("reservation", id.to_string())))?;
                        if user.is_admin() && owner != user.id {
                            let reason = reason
                                .filter(|r| !r.trim().is_empty())
                                .unwrap_or_else(|| DEFAULT_REJECTION_REASON.to_string());
                            engine
                                .reject_reservation(&actor, id, &reason)
                                .await
                                .map_err(engine_err)?;
                        } else {
                            engine.cancel_reservation(&actor, id).await.map_err(engine_err)?;
                        }
                    }
                    ReservationStatus::Pending => {
                        return Err(engine_err(EngineError::Invalid(
                            "status can only be set to approved or cancelled".into(),
                        )));
                    }
                }
                Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
            }
            Command::DeleteReservation { id } => {
                let actor = Actor::User(self.current_user(session)?);
                engine.delete_reservation(&actor, id).await.map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(1)))
            }
            Command::SelectReservations { query } => {
                let user = self.current_user(session)?;
                let actor = Actor::User(user.clone());
                let list = match query {
                    ReservationQuery::Mine { history } => {
                        engine.reservations_for_user(user.id, history).await
                    }
                    ReservationQuery::Day { space_id, date } => {
                        engine.day_agenda(&space_id, date).await.map_err(engine_err)?
                    }
                    ReservationQuery::Pending => {
                        engine.pending_reservations(&actor).await.map_err(engine_err)?
                    }
                    ReservationQuery::All => {
                        engine.all_reservations(&actor).await.map_err(engine_err)?
                    }
                };
                Ok(rows(reservations_schema(), &list, encode_reservation))
            }
            Command::SelectAvailability { request } => {
                self.current_user(session)?;
                let decision = engine.check_availability(&request).await.map_err(engine_err)?;
                let reason = match &decision {
                    Decision::Granted => None,
                    Decision::Rejected(r) => Some(r.to_string()),
                };
                let line = (request, decision.is_granted(), reason);
                Ok(rows(availability_schema(), &[line], |enc, (req, granted, reason)| {
                    enc.encode_field(&req.space_id)?;
                    enc.encode_field(&format_date(req.date))?;
                    enc.encode_field(&req.start)?;
                    enc.encode_field(&req.end)?;
                    enc.encode_field(granted)?;
                    enc.encode_field(reason)
                }))
            }
            Command::SelectFreeSlots { space_id, date } => {
                self.current_user(session)?;
                let slots = engine.free_slots(&space_id, date).await.map_err(engine_err)?;
                let day = format_date(date);
                Ok(rows(free_slots_schema(), &slots, |enc, slot| {
                    enc.encode_field(&space_id)?;
                    enc.encode_field(&day)?;
                    enc.encode_field(&format_time_of_day(slot.start))?;
                    enc.encode_field(&format_time_of_day(slot.end))
                }))
            }
            Command::SelectStatistics => {
                let actor = Actor::User(self.current_user(session)?);
                let stats = engine.statistics(&actor).await.map_err(engine_err)?;
                Ok(rows(statistics_schema(), &[stats], |enc, s| {
                    enc.encode_field(&(s.total as i64))?;
                    enc.encode_field(&s.most_requested.as_ref().map(|(name, _)| name.clone()))?;
                    enc.encode_field(&s.most_requested.as_ref().map(|(_, n)| *n as i64))?;
                    enc.encode_field(&i64::from(s.approved_hours))?;
                    enc.encode_field(&(s.pending as i64))?;
                    enc.encode_field(&(s.approved as i64))?;
                    enc.encode_field(&(s.cancelled as i64))
                }))
            }
        }
    }
}

// ── Result sets ──────────────────────────────────────────────────

fn rows<T>(
    schema: Vec<FieldInfo>,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let encoded: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(encoded)))
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn text_fields(names: &[&str]) -> Vec<FieldInfo> {
    names.iter().map(|n| field(n, Type::VARCHAR)).collect()
}

fn users_schema() -> Vec<FieldInfo> {
    let mut fields = text_fields(&["id", "email", "name", "last_name", "institutional_id", "role"]);
    fields.push(field("approved", Type::BOOL));
    fields
}

fn encode_user(enc: &mut DataRowEncoder, u: &User) -> PgWireResult<()> {
    enc.encode_field(&u.id.to_string())?;
    enc.encode_field(&u.email)?;
    enc.encode_field(&u.name)?;
    enc.encode_field(&u.last_name)?;
    enc.encode_field(&u.institutional_id)?;
    enc.encode_field(&u.role.as_str())?;
    enc.encode_field(&u.approved)
}

fn spaces_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("category", Type::VARCHAR),
        field("capacity", Type::INT8),
        field("location", Type::VARCHAR),
        field("description", Type::VARCHAR),
        field("active", Type::BOOL),
        field("favorite", Type::BOOL),
    ]
}

fn encode_space(enc: &mut DataRowEncoder, (s, favorite): &(Space, bool)) -> PgWireResult<()> {
    enc.encode_field(&s.id)?;
    enc.encode_field(&s.name)?;
    enc.encode_field(&s.category.as_str())?;
    enc.encode_field(&i64::from(s.capacity))?;
    enc.encode_field(&s.location)?;
    enc.encode_field(&s.description)?;
    enc.encode_field(&s.active)?;
    enc.encode_field(favorite)
}

fn equipment_schema() -> Vec<FieldInfo> {
    text_fields(&["id", "name"])
}

fn space_equipment_schema() -> Vec<FieldInfo> {
    let mut fields = text_fields(&["space_id", "equipment_id", "name"]);
    fields.push(field("quantity", Type::INT8));
    fields
}

fn favorites_schema() -> Vec<FieldInfo> {
    text_fields(&["space_id", "name"])
}

fn reservations_schema() -> Vec<FieldInfo> {
    let mut fields = text_fields(&[
        "id",
        "user_id",
        "space_id",
        "space_name",
        "date",
        "start_time",
        "end_time",
        "status",
        "equipment",
        "purpose",
        "rejection_reason",
    ]);
    fields.push(field("created_at", Type::INT8));
    fields
}

fn encode_reservation(enc: &mut DataRowEncoder, r: &Reservation) -> PgWireResult<()> {
    let items: Vec<String> = r
        .items
        .iter()
        .map(|i| format!("{}:{}", i.equipment_id, i.quantity))
        .collect();
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.user_id.to_string())?;
    enc.encode_field(&r.space_id)?;
    enc.encode_field(&r.space_name)?;
    enc.encode_field(&format_date(r.date))?;
    enc.encode_field(&format_time_of_day(r.span.start))?;
    enc.encode_field(&format_time_of_day(r.span.end))?;
    enc.encode_field(&r.status.as_str())?;
    enc.encode_field(&items.join(","))?;
    enc.encode_field(&r.purpose)?;
    enc.encode_field(&r.rejection_reason)?;
    enc.encode_field(&r.created_at)
}

fn recurring_schema() -> Vec<FieldInfo> {
    text_fields(&["date", "outcome", "reservation_id", "reason"])
}

fn availability_schema() -> Vec<FieldInfo> {
    let mut fields = text_fields(&["space_id", "date", "start_time", "end_time"]);
    fields.push(field("available", Type::BOOL));
    fields.push(field("reason", Type::VARCHAR));
    fields
}

fn free_slots_schema() -> Vec<FieldInfo> {
    text_fields(&["space_id", "date", "start_time", "end_time"])
}

fn statistics_schema() -> Vec<FieldInfo> {
    vec![
        field("total", Type::INT8),
        field("most_requested", Type::VARCHAR),
        field("most_requested_count", Type::INT8),
        field("approved_hours", Type::INT8),
        field("pending", Type::INT8),
        field("approved", Type::INT8),
        field("cancelled", Type::INT8),
    ]
}

/// Columns a statement will return, decided from its text alone.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::result_table(sql).as_deref() {
        Some("users") => users_schema(),
        Some("spaces") => spaces_schema(),
        Some("equipment") => equipment_schema(),
        Some("space_equipment") => space_equipment_schema(),
        Some("favorites") => favorites_schema(),
        Some("reservations") => reservations_schema(),
        Some("recurring") => recurring_schema(),
        Some("availability") => availability_schema(),
        Some("free_slots") => free_slots_schema(),
        Some("statistics") => statistics_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SpacebookHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        if query.trim().trim_end_matches(';').trim().is_empty() {
            return Ok(vec![Response::EmptyQuery]);
        }
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SpacebookQueryParser;

#[async_trait]
impl QueryParser for SpacebookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SpacebookHandler {
    type Statement = String;
    type QueryParser = SpacebookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        self.run(client, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// `$N` placeholders outside quoted literals and identifiers, as
/// `(byte range, N)` in statement order.
fn placeholders(sql: &str) -> Vec<(std::ops::Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            // A doubled quote is an escaped quote and toggles twice.
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => {
                quote = Some(b);
                i += 1;
            }
            b'$' => {
                let start = i;
                i += 1;
                let digits = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if let Ok(n) = sql[digits..i].parse::<usize>() {
                    found.push((start..i, n));
                }
            }
            _ => i += 1,
        }
    }
    found
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Quoted literal for one bound text parameter.
fn literal(param: Option<&[u8]>) -> String {
    match param {
        Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
        None => "NULL".to_string(),
    }
}

/// Inline bound parameters in one left-to-right pass, so bound text is
/// copied through as is even when it contains `$N` itself.
fn inline_params(sql: &str, params: &[Option<&[u8]>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (range, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..range.start]);
        out.push_str(&literal(*param));
        copied = range.end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    let params: Vec<Option<&[u8]>> = portal.parameters.iter().map(|p| p.as_deref()).collect();
    inline_params(&portal.statement.statement, &params)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SpacebookFactory {
    handler: Arc<SpacebookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<ServiceAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SpacebookFactory {
    /// One factory per connection, so the handler's session is that
    /// connection's session.
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = ServiceAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SpacebookHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SpacebookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = Arc::new(SpacebookFactory::new(engine, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Unavailable(_) => "23P01",
        EngineError::BadCredentials | EngineError::PendingApproval => "28P01",
        EngineError::Forbidden(_) => "42501",
        _ => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

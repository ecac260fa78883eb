use chrono::NaiveDate;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;
use crate::time::parse_date;

/// Account fields changed by `UPDATE users`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UserChanges {
    pub name: Option<String>,
    pub last_name: Option<String>,
    pub approved: Option<bool>,
    pub role: Option<Role>,
}

/// Space fields changed by `UPDATE spaces`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpaceChanges {
    pub name: Option<String>,
    pub category: Option<SpaceCategory>,
    pub capacity: Option<u32>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReservationQuery {
    /// The signed-in user's reservations.
    Mine { history: bool },
    /// Non-cancelled reservations of one space on one date.
    Day { space_id: String, date: NaiveDate },
    Pending,
    All,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    Login { email: String, password: String },
    Logout,
    Listen { channel: String },
    /// `None` is `UNLISTEN *`.
    Unlisten { channel: Option<String> },
    InsertUser {
        email: String,
        password: String,
        name: String,
        last_name: String,
        institutional_id: String,
    },
    UpdateUser { id: Ulid, changes: UserChanges },
    DeleteUser { id: Ulid },
    SelectUsers,
    InsertSpace { space: Space },
    UpdateSpace { id: String, changes: SpaceChanges },
    DeleteSpace { id: String },
    SelectSpaces { favorites_only: bool },
    InsertEquipment { id: String, name: String },
    SelectEquipment,
    LinkEquipment { space_id: String, equipment_id: String, quantity: u32 },
    UnlinkEquipment { space_id: String, equipment_id: String },
    SelectSpaceEquipment { space_id: String },
    ToggleFavorite { space_id: String },
    SelectFavorites,
    InsertReservation {
        request: ReservationRequest,
        repeat_until: Option<NaiveDate>,
    },
    UpdateReservation {
        id: Ulid,
        status: ReservationStatus,
        reason: Option<String>,
    },
    DeleteReservation { id: Ulid },
    SelectReservations { query: ReservationQuery },
    SelectAvailability { request: ReservationRequest },
    SelectFreeSlots { space_id: String, date: NaiveDate },
    SelectStatistics,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    let upper = trimmed.to_uppercase();
    if upper == "LOGOUT" {
        return Ok(Command::Logout);
    }
    if upper.starts_with("LOGIN ") {
        let args = quoted_args(&trimmed[6..])?;
        let [email, password]: [String; 2] = args
            .try_into()
            .map_err(|a: Vec<String>| SqlError::WrongArity("LOGIN", 2, a.len()))?;
        return Ok(Command::Login { email, password });
    }
    if upper.starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches('"').to_lowercase();
        return Ok(Command::Listen { channel });
    }
    if upper.starts_with("UNLISTEN ") {
        let channel = trimmed[9..].trim().trim_matches('"').to_lowercase();
        let channel = (channel != "*").then_some(channel);
        return Ok(Command::Unlisten { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table_factor_name(&table.relation)?, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Name of the row set a statement returns, read without binding parameters.
/// `None` for statements that only report a command tag.
pub fn result_table(sql: &str) -> Option<String> {
    let upper = sql.trim_start().to_uppercase();
    if upper.starts_with("LOGIN ") {
        return Some("users".into());
    }
    if upper.starts_with("LOGOUT") || upper.starts_with("LISTEN ") || upper.starts_with("UNLISTEN ") {
        return None;
    }
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Query(query) => match query.body.as_ref() {
            SetExpr::Select(select) => table_factor_name(&select.from.first()?.relation).ok(),
            _ => None,
        },
        Statement::Insert(insert) if insert_table_name(insert).ok()? == "reservations" => {
            let recurring = if insert.columns.is_empty() {
                extract_insert_values(insert).ok()?.len() == 7
            } else {
                insert.columns.iter().any(|c| c.value.eq_ignore_ascii_case("repeat_until"))
            };
            Some(if recurring { "recurring" } else { "reservations" }.into())
        }
        _ => None,
    }
}

/// `'a' 'b''c'` → `["a", "b'c"]`.
fn quoted_args(input: &str) -> Result<Vec<String>, SqlError> {
    let mut args = Vec::new();
    let mut chars = input.trim().chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_whitespace() || c == ',' {
            continue;
        }
        if c != '\'' {
            return Err(SqlError::Parse(format!("expected quoted string near {c:?}")));
        }
        let mut arg = String::new();
        loop {
            match chars.next() {
                Some('\'') if chars.peek() == Some(&'\'') => {
                    chars.next();
                    arg.push('\'');
                }
                Some('\'') => break,
                Some(ch) => arg.push(ch),
                None => return Err(SqlError::Parse("unterminated string".into())),
            }
        }
        args.push(arg);
    }
    Ok(args)
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by column name.
struct Row {
    table: &'static str,
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        parse_string_expr(self.require(column)?)
    }

    fn string_or_default(&self, column: &str) -> Result<String, SqlError> {
        match self.get(column) {
            Some(e) => parse_string_or_null(e).map(Option::unwrap_or_default),
            None => Ok(String::new()),
        }
    }
}

fn insert_row(
    insert: &ast::Insert,
    table: &'static str,
    default_columns: &[&str],
) -> Result<Row, SqlError> {
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = if insert.columns.is_empty() {
        default_columns.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|i| i.value.to_lowercase()).collect()
    };
    if values.len() > columns.len() {
        return Err(SqlError::WrongArity(table, columns.len(), values.len()));
    }
    if !insert.columns.is_empty() && values.len() != columns.len() {
        return Err(SqlError::WrongArity(table, columns.len(), values.len()));
    }
    Ok(Row {
        table,
        cells: columns.into_iter().zip(values).collect(),
    })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;

    match table.as_str() {
        "users" => {
            let row = insert_row(
                insert,
                "users",
                &["email", "password", "name", "last_name", "institutional_id"],
            )?;
            Ok(Command::InsertUser {
                email: row.string("email")?,
                password: row.string("password")?,
                name: row.string_or_default("name")?,
                last_name: row.string_or_default("last_name")?,
                institutional_id: row.string_or_default("institutional_id")?,
            })
        }
        "spaces" => {
            let row = insert_row(
                insert,
                "spaces",
                &["id", "name", "category", "capacity", "location", "description", "active"],
            )?;
            let category = match row.get("category") {
                Some(e) => parse_category(e)?,
                None => SpaceCategory::Room,
            };
            let capacity = match row.get("capacity") {
                Some(e) => parse_u32(e)?,
                None => 0,
            };
            let active = match row.get("active") {
                Some(e) => parse_bool(e)?,
                None => true,
            };
            Ok(Command::InsertSpace {
                space: Space {
                    id: row.string_or_default("id")?,
                    name: row.string("name")?,
                    category,
                    capacity,
                    location: row.string_or_default("location")?,
                    description: row.string_or_default("description")?,
                    active,
                },
            })
        }
        "equipment" => {
            let row = insert_row(insert, "equipment", &["id", "name"])?;
            Ok(Command::InsertEquipment {
                id: row.string("id")?,
                name: row.string("name")?,
            })
        }
        "space_equipment" => {
            let row = insert_row(insert, "space_equipment", &["space_id", "equipment_id", "quantity"])?;
            Ok(Command::LinkEquipment {
                space_id: row.string("space_id")?,
                equipment_id: row.string("equipment_id")?,
                quantity: parse_u32(row.require("quantity")?)?,
            })
        }
        "favorites" => {
            let row = insert_row(insert, "favorites", &["space_id"])?;
            Ok(Command::ToggleFavorite {
                space_id: row.string("space_id")?,
            })
        }
        "reservations" => {
            let row = insert_row(
                insert,
                "reservations",
                &["space_id", "date", "start_time", "end_time", "purpose", "equipment", "repeat_until"],
            )?;
            let repeat_until = match row.get("repeat_until") {
                Some(e) => parse_string_or_null(e)?
                    .filter(|s| !s.trim().is_empty())
                    .map(|s| parse_date_text(&s))
                    .transpose()?,
                None => None,
            };
            Ok(Command::InsertReservation {
                request: ReservationRequest {
                    space_id: row.string("space_id")?,
                    date: parse_date_text(&row.string("date")?)?,
                    start: row.string("start_time")?,
                    end: row.string("end_time")?,
                    items: parse_equipment_list(&row.string_or_default("equipment")?)?,
                    purpose: row.string_or_default("purpose")?,
                },
                repeat_until,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `'eq_pc:5,eq_tv:1'` → `[("eq_pc", 5), ("eq_tv", 1)]`. Empty means whole space.
pub fn parse_equipment_list(text: &str) -> Result<Vec<(String, u32)>, SqlError> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let (id, qty) = part
                .split_once(':')
                .ok_or_else(|| SqlError::Parse(format!("expected equipment_id:quantity, got {part:?}")))?;
            let qty = qty
                .trim()
                .parse::<u32>()
                .map_err(|e| SqlError::Parse(format!("bad quantity in {part:?}: {e}")))?;
            Ok((id.trim().to_string(), qty))
        })
        .collect()
}

// ── UPDATE ────────────────────────────────────────────────────

fn parse_update(
    table: &str,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let mut set = Vec::with_capacity(assignments.len());
    for a in assignments {
        let column = match &a.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        set.push((column, &a.value));
    }
    if set.is_empty() {
        return Err(SqlError::Parse("UPDATE without SET".into()));
    }

    match table {
        "users" => {
            let id = parse_ulid_expr(extract_where_id(selection)?)?;
            let mut changes = UserChanges::default();
            for (column, value) in set {
                match column.as_str() {
                    "name" => changes.name = Some(parse_string_expr(value)?),
                    "last_name" => changes.last_name = Some(parse_string_expr(value)?),
                    "approved" => changes.approved = Some(parse_bool(value)?),
                    "role" => {
                        let text = parse_string_expr(value)?;
                        changes.role = Some(
                            Role::parse(&text)
                                .ok_or_else(|| SqlError::Parse(format!("unknown role {text:?}")))?,
                        );
                    }
                    other => return Err(SqlError::UnknownColumn("users", other.to_string())),
                }
            }
            Ok(Command::UpdateUser { id, changes })
        }
        "spaces" => {
            let id = parse_string_expr(extract_where_id(selection)?)?;
            let mut changes = SpaceChanges::default();
            for (column, value) in set {
                match column.as_str() {
                    "name" => changes.name = Some(parse_string_expr(value)?),
                    "category" => changes.category = Some(parse_category(value)?),
                    "capacity" => changes.capacity = Some(parse_u32(value)?),
                    "location" => changes.location = Some(parse_string_expr(value)?),
                    "description" => changes.description = Some(parse_string_expr(value)?),
                    "active" => changes.active = Some(parse_bool(value)?),
                    other => return Err(SqlError::UnknownColumn("spaces", other.to_string())),
                }
            }
            Ok(Command::UpdateSpace { id, changes })
        }
        "reservations" => {
            let id = parse_ulid_expr(extract_where_id(selection)?)?;
            let (mut status, mut reason) = (None, None);
            for (column, value) in set {
                match column.as_str() {
                    "status" => {
                        let text = parse_string_expr(value)?;
                        status = Some(
                            ReservationStatus::parse(&text)
                                .ok_or_else(|| SqlError::Parse(format!("unknown status {text:?}")))?,
                        );
                    }
                    "rejection_reason" => reason = parse_string_or_null(value)?,
                    other => {
                        return Err(SqlError::UnknownColumn("reservations", other.to_string()));
                    }
                }
            }
            Ok(Command::UpdateReservation {
                id,
                status: status.ok_or(SqlError::MissingColumn("reservations", "status"))?,
                reason,
            })
        }
        other => Err(SqlError::UnknownTable(other.to_string())),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;

    match table.as_str() {
        "users" => Ok(Command::DeleteUser {
            id: parse_ulid_expr(extract_where_id(&delete.selection)?)?,
        }),
        "spaces" => Ok(Command::DeleteSpace {
            id: parse_string_expr(extract_where_id(&delete.selection)?)?,
        }),
        "reservations" => Ok(Command::DeleteReservation {
            id: parse_ulid_expr(extract_where_id(&delete.selection)?)?,
        }),
        "space_equipment" => {
            let filters = where_filters(&delete.selection)?;
            Ok(Command::UnlinkEquipment {
                space_id: filters.string("space_id")?,
                equipment_id: filters.string("equipment_id")?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// `col = value` conjuncts of a WHERE clause.
struct Filters(Vec<(String, Expr)>);

impl Filters {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.0.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn string(&self, column: &'static str) -> Result<String, SqlError> {
        parse_string_expr(self.get(column).ok_or(SqlError::MissingFilter(column))?)
    }

    fn date(&self, column: &'static str) -> Result<NaiveDate, SqlError> {
        parse_date_text(&self.string(column)?)
    }

    fn flag(&self, column: &str) -> Result<bool, SqlError> {
        self.get(column).map(parse_bool).transpose().map(|b| b.unwrap_or(false))
    }
}

fn where_filters(selection: &Option<Expr>) -> Result<Filters, SqlError> {
    let mut out = Vec::new();
    if let Some(expr) = selection {
        collect_eq_filters(expr, &mut out)?;
    }
    Ok(Filters(out))
}

fn collect_eq_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)?;
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, (**right).clone()));
            }
            other => return Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        Expr::Nested(inner) => collect_eq_filters(inner, out)?,
        other => return Err(SqlError::Unsupported(format!("filter {other}"))),
    }
    Ok(())
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = where_filters(&select.selection)?;

    match table.as_str() {
        "users" => Ok(Command::SelectUsers),
        "spaces" => Ok(Command::SelectSpaces {
            favorites_only: filters.flag("favorite")?,
        }),
        "equipment" => Ok(Command::SelectEquipment),
        "space_equipment" => Ok(Command::SelectSpaceEquipment {
            space_id: filters.string("space_id")?,
        }),
        "favorites" => Ok(Command::SelectFavorites),
        "reservations" => {
            let query = if filters.get("user_id").is_some() {
                let who = filters.string("user_id")?;
                if who != "me" {
                    return Err(SqlError::Unsupported(
                        "reservations can only be filtered by user_id = 'me'".into(),
                    ));
                }
                ReservationQuery::Mine {
                    history: filters.flag("history")?,
                }
            } else if filters.get("space_id").is_some() {
                ReservationQuery::Day {
                    space_id: filters.string("space_id")?,
                    date: filters.date("date")?,
                }
            } else if filters.get("status").is_some() {
                let status = filters.string("status")?;
                if ReservationStatus::parse(&status) != Some(ReservationStatus::Pending) {
                    return Err(SqlError::Unsupported(format!("status filter {status:?}")));
                }
                ReservationQuery::Pending
            } else {
                ReservationQuery::All
            };
            Ok(Command::SelectReservations { query })
        }
        "availability" => Ok(Command::SelectAvailability {
            request: ReservationRequest {
                space_id: filters.string("space_id")?,
                date: filters.date("date")?,
                start: filters.string("start_time")?,
                end: filters.string("end_time")?,
                items: match filters.get("equipment") {
                    Some(e) => parse_equipment_list(&parse_string_expr(e)?)?,
                    None => Vec::new(),
                },
                purpose: String::new(),
            },
        }),
        "free_slots" => Ok(Command::SelectFreeSlots {
            space_id: filters.string("space_id")?,
            date: filters.date("date")?,
        }),
        "statistics" => Ok(Command::SelectStatistics),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<&Expr, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => Ok(right.as_ref()),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(Value::Boolean(b)) => Ok(Some(b.to_string())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_category(expr: &Expr) -> Result<SpaceCategory, SqlError> {
    let text = parse_string_expr(expr)?;
    SpaceCategory::parse(&text).ok_or_else(|| SqlError::Parse(format!("unknown category {text:?}")))
}

fn parse_date_text(text: &str) -> Result<NaiveDate, SqlError> {
    parse_date(text).map_err(|e| SqlError::Parse(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(e) => write!(f, "parse error: {e}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "unknown column {c} for {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing column {c}"),
            SqlError::MissingFilter(c) => write!(f, "missing WHERE filter: {c}"),
        }
    }
}

impl std::error::Error for SqlError {}

use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "spacebook_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "spacebook_query_duration_seconds";

// ── Domain counters ─────────────────────────────────────────────

/// Counter: reservations admitted (pending or approved).
pub const RESERVATIONS_GRANTED_TOTAL: &str = "spacebook_reservations_granted_total";

/// Counter: reservations refused by the availability check.
pub const RESERVATIONS_REJECTED_TOTAL: &str = "spacebook_reservations_rejected_total";

/// Counter: alerts delivered as NOTIFY messages. Labels: channel.
pub const ALERTS_SENT_TOTAL: &str = "spacebook_alerts_sent_total";

/// Counter: failed in-band LOGIN attempts.
pub const LOGIN_FAILURES_TOTAL: &str = "spacebook_login_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "spacebook_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "spacebook_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "spacebook_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spacebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spacebook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::Login { .. } => "login",
        Command::Logout => "logout",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::InsertUser { .. } => "insert_user",
        Command::UpdateUser { .. } => "update_user",
        Command::DeleteUser { .. } => "delete_user",
        Command::SelectUsers => "select_users",
        Command::InsertSpace { .. } => "insert_space",
        Command::UpdateSpace { .. } => "update_space",
        Command::DeleteSpace { .. } => "delete_space",
        Command::SelectSpaces { .. } => "select_spaces",
        Command::InsertEquipment { .. } => "insert_equipment",
        Command::SelectEquipment => "select_equipment",
        Command::LinkEquipment { .. } => "link_equipment",
        Command::UnlinkEquipment { .. } => "unlink_equipment",
        Command::SelectSpaceEquipment { .. } => "select_space_equipment",
        Command::ToggleFavorite { .. } => "toggle_favorite",
        Command::SelectFavorites => "select_favorites",
        Command::InsertReservation { repeat_until: Some(_), .. } => "insert_recurring",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::UpdateReservation { .. } => "update_reservation",
        Command::DeleteReservation { .. } => "delete_reservation",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectFreeSlots { .. } => "select_free_slots",
        Command::SelectStatistics => "select_statistics",
    }
}

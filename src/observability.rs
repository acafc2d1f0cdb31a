use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "labdesk_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "labdesk_query_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "labdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "labdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "labdesk_connections_rejected_total";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "labdesk_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "labdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "labdesk_wal_flush_batch_size";

// ── Domain ──────────────────────────────────────────────────────

/// Counter: writes refused for a double booking. Labels: kind (resource, person).
pub const BOOKING_CONFLICTS_TOTAL: &str = "labdesk_booking_conflicts_total";

/// Counter: bookings moved by attendance sync. Labels: direction (released, restored).
pub const ATTENDANCE_SYNC_TRANSITIONS_TOTAL: &str = "labdesk_attendance_sync_transitions_total";

/// Counter: replication candidates by outcome. Labels: outcome
/// (applied, conflict, student_conflict, unavailable_pc).
pub const REPLICATION_OUTCOMES_TOTAL: &str = "labdesk_replication_outcomes_total";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertPc { .. } => "insert_pc",
        Command::UpdatePc { .. } => "update_pc",
        Command::DeletePc { .. } => "delete_pc",
        Command::SelectPcs { .. } => "select_pcs",
        Command::InsertStudent { .. } => "insert_student",
        Command::InsertBatch { .. } => "insert_batch",
        Command::InsertBooking { .. } => "insert_booking",
        Command::UpdateBooking { .. } => "update_booking",
        Command::DeleteBooking { .. } => "delete_booking",
        Command::ClearBookings { .. } => "clear_bookings",
        Command::SelectBookings { .. } => "select_bookings",
        Command::SelectAvailability { .. } => "select_availability",
        Command::SelectPreviousBookings { .. } => "select_previous_bookings",
        Command::Replicate { .. } => "replicate",
        Command::MarkAttendance { .. } => "mark_attendance",
    }
}

use std::net::SocketAddr;

// ── Reservations ────────────────────────────────────────────────

/// Counter: reservations accepted as pending.
pub const RESERVATIONS_CREATED_TOTAL: &str = "rentrack_reservations_created_total";

/// Counter: requests refused because of an overlapping active reservation.
/// Labels: op (create|approve|update).
pub const CONFLICTS_TOTAL: &str = "rentrack_conflicts_total";

/// Counter: status writes. Labels: to, source (scheduler|action).
pub const STATUS_TRANSITIONS_TOTAL: &str = "rentrack_status_transitions_total";

/// Histogram: one scheduler pass, in seconds.
pub const SCHEDULER_TICK_DURATION_SECONDS: &str = "rentrack_scheduler_tick_duration_seconds";

// ── Telemetry ───────────────────────────────────────────────────

/// Counter: inbound device messages. Labels: outcome (accepted|malformed).
pub const TELEMETRY_MESSAGES_TOTAL: &str = "rentrack_telemetry_messages_total";

/// Counter: inactivity alerts emitted by the liveness sweep.
pub const LIVENESS_ALERTS_TOTAL: &str = "rentrack_liveness_alerts_total";

// ── Observer sessions ───────────────────────────────────────────

/// Gauge: connected observer sessions.
pub const SESSIONS_ACTIVE: &str = "rentrack_sessions_active";

/// Counter: refused admin claims (bad secret or slot taken).
pub const ADMIN_REJECTED_TOTAL: &str = "rentrack_admin_rejected_total";

/// Counter: events dropped because a session queue was full.
pub const SESSION_DROPS_TOTAL: &str = "rentrack_session_drops_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentrack_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentrack_wal_flush_batch_size";

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

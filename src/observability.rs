use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: booking attempts. Labels: status (`created` or an error label).
pub const BOOKINGS_TOTAL: &str = "deskbook_bookings_total";

/// Histogram: end-to-end booking latency in seconds, lock wait included.
pub const BOOKING_DURATION_SECONDS: &str = "deskbook_booking_duration_seconds";

/// Counter: cancellation attempts. Labels: status.
pub const CANCELLATIONS_TOTAL: &str = "deskbook_cancellations_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent waiting for a per-office lease, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "deskbook_lock_wait_seconds";

/// Counter: lease acquisitions that gave up at the wait deadline.
pub const LOCK_TIMEOUTS_TOTAL: &str = "deskbook_lock_timeouts_total";

/// Counter: lapsed leases removed by the reaper.
pub const LEASES_REAPED_TOTAL: &str = "deskbook_leases_reaped_total";

/// Gauge: registered offices.
pub const OFFICES_ACTIVE: &str = "deskbook_offices_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "deskbook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "deskbook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install the fmt subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

/// Map an operation outcome to a `status` label.
pub fn status_label<T>(result: &Result<T, crate::engine::EngineError>, ok: &'static str) -> &'static str {
    match result {
        Ok(_) => ok,
        Err(e) => e.label(),
    }
}

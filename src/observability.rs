use std::net::SocketAddr;

// ── Decision metrics ────────────────────────────────────────────

/// Counter: applied transitions. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "roombook_transitions_total";

/// Counter: refused or failed attempts. Labels: kind.
pub const REJECTIONS_TOTAL: &str = "roombook_rejections_total";

/// Counter: bans issued. Labels: kind (temporary, permanent).
pub const BANS_TOTAL: &str = "roombook_bans_total";

// ── Background work ─────────────────────────────────────────────

/// Histogram: one scheduler sweep, in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "roombook_sweep_duration_seconds";

/// Gauge: live (pending or confirmed) reservations seen by the last sweep.
pub const LIVE_RESERVATIONS: &str = "roombook_live_reservations";

/// Histogram: WAL append + fsync duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "roombook_wal_compactions_total";

/// Install the Prometheus exporter on the given port. No-op if port is None.
/// A failed install is logged and the process carries on without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

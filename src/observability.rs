use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: subscriptions opened.
pub const SUBSCRIPTIONS_OPENED_TOTAL: &str = "lodgecast_subscriptions_opened_total";

/// Counter: listings surfaced to clients.
pub const LISTINGS_QUEUED_TOTAL: &str = "lodgecast_listings_queued_total";

/// Counter: listings settled. Labels: status (verified/rejected/probation).
pub const LISTINGS_SETTLED_TOTAL: &str = "lodgecast_listings_settled_total";

/// Counter: subscriptions that ran out of non-expired region trackers.
pub const SUBSCRIPTIONS_EXPIRED_TOTAL: &str = "lodgecast_subscriptions_expired_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: campus engines currently loaded.
pub const CAMPUSES_ACTIVE: &str = "lodgecast_campuses_active";

/// Counter: verifier sweeps that found at least one due listing.
pub const VERIFIER_SWEEPS_TOTAL: &str = "lodgecast_verifier_sweeps_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "lodgecast_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "lodgecast_wal_flush_batch_size";

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

/// Install the fmt tracing subscriber. Hosts that bring their own subscriber
/// skip this; repeat calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().try_init();
}

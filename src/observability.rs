use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing_subscriber::EnvFilter;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: admission attempts. Labels: outcome.
pub const ADMISSIONS_TOTAL: &str = "rentlock_admissions_total";

/// Histogram: admission latency in seconds, lock wait included.
pub const ADMISSION_DURATION_SECONDS: &str = "rentlock_admission_duration_seconds";

/// Counter: booking lifecycle transitions applied. Labels: to.
pub const TRANSITIONS_TOTAL: &str = "rentlock_transitions_total";

/// Counter: pending bookings cancelled by the reaper.
pub const PENDING_REAPED_TOTAL: &str = "rentlock_pending_reaped_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent waiting for a stock key's write lock, in seconds.
pub const LOCK_WAIT_SECONDS: &str = "rentlock_lock_wait_seconds";

/// Counter: writes that gave up waiting for a stock key's lock.
pub const LOCK_TIMEOUTS_TOTAL: &str = "rentlock_lock_timeouts_total";

/// Counter: ledger releases that would have gone below zero.
pub const LEDGER_ANOMALIES_TOTAL: &str = "rentlock_ledger_anomalies_total";

/// Counter: logged events refused on apply because the ledger could not take them.
pub const APPLY_REJECTED_TOTAL: &str = "rentlock_apply_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "rentlock_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "rentlock_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "rentlock_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Install a fmt subscriber filtered by `filter` (`RUST_LOG` syntax). Returns false if a
/// global subscriber was already set.
pub fn init_tracing(filter: &str) -> bool {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_installs_once() {
        let _ = init_tracing("rentlock=debug");
        assert!(!init_tracing("info"));
    }

    #[test]
    fn metrics_disabled_without_port() {
        assert!(init(None).is_ok());
    }
}

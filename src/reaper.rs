use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// How often background tasks look for work.
const SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// `tokio::time::interval` panics on a zero period.
const MIN_SCAN_INTERVAL: Duration = Duration::from_millis(1);

fn reaper_period(ttl: Duration) -> Duration {
    SCAN_INTERVAL.min(ttl).max(MIN_SCAN_INTERVAL)
}

/// Cancel every booking that has sat in `pending` for longer than `ttl`. Returns how many
/// were cancelled.
pub async fn reap_stale_pending(engine: &Engine, ttl: Duration) -> usize {
    let Ok(ttl) = chrono::Duration::from_std(ttl) else {
        return 0;
    };
    let cutoff = engine.now() - ttl;
    let mut reaped = 0;
    for booking_id in engine.collect_stale_pending(cutoff).await {
        match engine.cancel(booking_id).await {
            Ok(_) => {
                reaped += 1;
                metrics::counter!(crate::observability::PENDING_REAPED_TOTAL).increment(1);
                info!(booking = %booking_id, "cancelled stale pending booking");
            }
            // Confirmed or cancelled since the scan
            Err(e) => debug!("reaper skip {booking_id}: {e}"),
        }
    }
    reaped
}

/// Background task that cancels abandoned pending bookings.
pub async fn run_reaper(engine: Arc<Engine>, ttl: Duration) {
    let mut interval = tokio::time::interval(reaper_period(ttl));
    loop {
        interval.tick().await;
        reap_stale_pending(&engine, ttl).await;
    }
}

/// Background task that compacts the WAL once `threshold` appends have accumulated.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(SCAN_INTERVAL);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!(appends, "compacted WAL"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::clock::FixedClock;
    use crate::config::EngineSettings;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("rentlock_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, day).unwrap()
    }

    async fn setup(name: &str) -> (Arc<Engine>, Arc<FixedClock>, StockKey) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let item = Ulid::new();
        catalog.upsert(RentableItem {
            id: item,
            price_per_day: Decimal::TEN,
            minimum_rental_days: 1,
        });
        let clock = Arc::new(FixedClock::at_date(d(1)));
        let engine = Engine::new(
            test_wal_path(name),
            Arc::new(NotifyHub::new()),
            catalog,
            EngineSettings::default(),
        )
        .unwrap()
        .with_clock(clock.clone());
        let branch = Ulid::new();
        engine.provision_stock(item, branch, 2, None).await.unwrap();
        (Arc::new(engine), clock, StockKey::new(item, branch))
    }

    #[tokio::test]
    async fn cancels_only_stale_pending() {
        let (engine, clock, key) = setup("stale_pending.wal").await;
        let stale = engine
            .admit(Ulid::new(), key.item_id, key.branch_id, d(10), d(12), 1)
            .await
            .unwrap();
        let confirmed = engine
            .admit(Ulid::new(), key.item_id, key.branch_id, d(10), d(12), 1)
            .await
            .unwrap();
        engine.confirm(confirmed.id).await.unwrap();

        clock.advance(chrono::Duration::minutes(20));
        let reaped = reap_stale_pending(&engine, Duration::from_secs(15 * 60)).await;
        assert_eq!(reaped, 1);

        let stale = engine.get_booking(stale.id).await.unwrap();
        assert_eq!(stale.status, BookingStatus::Cancelled);
        assert_eq!(
            engine.get_booking(confirmed.id).await.unwrap().status,
            BookingStatus::Confirmed
        );
        let cap = engine.capacity_on(key.item_id, key.branch_id, d(11)).await.unwrap();
        assert_eq!(cap.rented, 1);
    }

    #[tokio::test]
    async fn fresh_pending_is_left_alone() {
        let (engine, clock, key) = setup("fresh_pending.wal").await;
        engine
            .admit(Ulid::new(), key.item_id, key.branch_id, d(10), d(12), 1)
            .await
            .unwrap();
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(reap_stale_pending(&engine, Duration::from_secs(15 * 60)).await, 0);
    }

    #[test]
    fn reaper_period_is_never_zero() {
        assert_eq!(reaper_period(Duration::ZERO), MIN_SCAN_INTERVAL);
        assert_eq!(reaper_period(Duration::from_secs(2)), Duration::from_secs(2));
        assert_eq!(reaper_period(Duration::from_secs(3600)), SCAN_INTERVAL);
    }

    #[tokio::test]
    async fn zero_ttl_reaper_keeps_running() {
        let (engine, _clock, _key) = setup("zero_ttl.wal").await;
        let reaper = tokio::spawn(run_reaper(engine, Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!reaper.is_finished());
        reaper.abort();
    }

    #[tokio::test]
    async fn compaction_keeps_state() {
        let (engine, _clock, key) = setup("compactor.wal").await;
        for _ in 0..4 {
            let b = engine
                .admit(Ulid::new(), key.item_id, key.branch_id, d(10), d(12), 1)
                .await
                .unwrap();
            engine.cancel(b.id).await.unwrap();
        }
        assert!(engine.wal_appends_since_compact().await >= 8);
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_bookings(key.item_id, key.branch_id).await.unwrap().len(), 4);
    }
}

use chrono::{Days, NaiveDate};
use tokio::sync::{OwnedRwLockReadGuard, oneshot};
use tracing::debug;
use ulid::Ulid;

use crate::limits::MAX_QUERY_DAYS;
use crate::model::*;

use super::error::{InvalidBooking, Missing};
use super::resolver;
use super::state::StockState;
use super::{Engine, EngineError, WalCommand};

fn query_range(start: NaiveDate, end: NaiveDate) -> Result<DateRange, EngineError> {
    if end < start {
        return Err(InvalidBooking::EndNotAfterStart { start, end }.into());
    }
    let range = DateRange::new(start, end);
    if range.day_count() > MAX_QUERY_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(range)
}

impl Engine {
    /// Shared lock on a stock key, bounded by `lock_timeout` like writes are.
    pub(super) async fn read_stock(
        &self,
        key: &StockKey,
    ) -> Result<OwnedRwLockReadGuard<StockState>, EngineError> {
        let st = self
            .get_stock(key)
            .ok_or(EngineError::NotFound(Missing::Stock(*key)))?;
        let guard = tokio::time::timeout(self.settings.lock_timeout, st.read_owned())
            .await
            .map_err(|_| {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                EngineError::LockTimeout {
                    key: *key,
                    waited: self.settings.lock_timeout,
                }
            })?;
        if guard.retired {
            return Err(EngineError::NotFound(Missing::Stock(*key)));
        }
        Ok(guard)
    }

    /// Ledger counts for today.
    pub async fn get_capacity(&self, item_id: Ulid, branch_id: Ulid) -> Result<CapacitySnapshot, EngineError> {
        self.capacity_on(item_id, branch_id, self.clock.today()).await
    }

    pub async fn capacity_on(
        &self,
        item_id: Ulid,
        branch_id: Ulid,
        day: NaiveDate,
    ) -> Result<CapacitySnapshot, EngineError> {
        let guard = self.read_stock(&StockKey::new(item_id, branch_id)).await?;
        Ok(guard.capacity_on(day))
    }

    /// Advisory only: admission re-checks under the write lock.
    pub async fn is_available(
        &self,
        item_id: Ulid,
        branch_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        quantity: u32,
    ) -> Result<bool, EngineError> {
        let range = query_range(start, end)?;
        let guard = self.read_stock(&StockKey::new(item_id, branch_id)).await?;
        Ok(resolver::is_available(&guard, &range, quantity))
    }

    pub async fn available_quantity(
        &self,
        item_id: Ulid,
        branch_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<u32, EngineError> {
        let range = query_range(start, end)?;
        let guard = self.read_stock(&StockKey::new(item_id, branch_id)).await?;
        Ok(resolver::available_quantity(&guard, &range))
    }

    /// Free units per day across `[from, to]`, as runs of equal counts.
    pub async fn availability_calendar(
        &self,
        item_id: Ulid,
        branch_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<FreeSpan>, EngineError> {
        let window = query_range(from, to)?;
        let guard = self.read_stock(&StockKey::new(item_id, branch_id)).await?;
        Ok(resolver::free_calendar(&guard, &window))
    }

    /// Sub-ranges of `[from, to]` with at least `quantity` units free on every day. Candidates
    /// for a date picker; an admission spanning several of them can still be refused.
    pub async fn bookable_ranges(
        &self,
        item_id: Ulid,
        branch_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        quantity: u32,
    ) -> Result<Vec<DateRange>, EngineError> {
        let window = query_range(from, to)?;
        let guard = self.read_stock(&StockKey::new(item_id, branch_id)).await?;
        Ok(resolver::bookable_ranges(&guard, &window, quantity))
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        let key = self
            .get_stock_for_entity(&booking_id)
            .ok_or(EngineError::NotFound(Missing::Booking(booking_id)))?;
        let guard = self.read_stock(&key).await?;
        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(Missing::Booking(booking_id)))
    }

    /// Every booking on the stock, terminal ones included, ordered by start date.
    pub async fn list_bookings(&self, item_id: Ulid, branch_id: Ulid) -> Result<Vec<Booking>, EngineError> {
        let guard = self.read_stock(&StockKey::new(item_id, branch_id)).await?;
        let mut bookings: Vec<Booking> = guard.bookings.values().cloned().collect();
        bookings.sort_by_key(|b| (b.range.start, b.id));
        Ok(bookings)
    }

    pub async fn list_maintenance(
        &self,
        item_id: Ulid,
        branch_id: Ulid,
    ) -> Result<Vec<MaintenanceWindow>, EngineError> {
        let guard = self.read_stock(&StockKey::new(item_id, branch_id)).await?;
        let mut windows: Vec<MaintenanceWindow> = guard.maintenance.values().cloned().collect();
        windows.sort_by_key(|w| (w.starts_at, w.id));
        Ok(windows)
    }

    pub async fn list_stock(&self) -> Vec<StockInfo> {
        let stocks: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut infos = Vec::with_capacity(stocks.len());
        for st in stocks {
            let guard = st.read().await;
            if !guard.retired {
                infos.push(guard.info());
            }
        }
        infos.sort_by_key(|i| i.key);
        infos
    }

    /// Days on which the ledger disagrees with the blocking intervals. Empty when consistent.
    pub async fn reconcile(&self, item_id: Ulid, branch_id: Ulid) -> Result<Vec<LedgerDrift>, EngineError> {
        let guard = self.read_stock(&StockKey::new(item_id, branch_id)).await?;
        Ok(guard.reconcile())
    }

    /// Cancelled and returned bookings ending before this day are dropped at compaction.
    pub fn retention_horizon(&self) -> Option<NaiveDate> {
        let days = self.settings.retention_days?;
        self.clock.today().checked_sub_days(Days::new(u64::from(days)))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    ///
    /// The provision gate keeps new stock out of the map, and read guards on every stock are
    /// held until the writer has swapped files, so no append can slip between the snapshot and
    /// the swap. Terminal bookings older than the retention horizon are left out of the snapshot
    /// and then dropped from memory.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let gate = self.provision_gate.write().await;
        let stocks: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(stocks.len());
        for st in stocks {
            guards.push(st.read_owned().await);
        }
        guards.retain(|g| !g.retired);
        guards.sort_by_key(|g| g.key);

        let horizon = self.retention_horizon();
        let events: Vec<Event> = guards.iter().flat_map(|g| g.snapshot_events(horizon)).collect();
        let expired: Vec<(StockKey, Vec<Ulid>)> = guards
            .iter()
            .map(|g| (g.key, g.expired_bookings(horizon)))
            .filter(|(_, ids)| !ids.is_empty())
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()));
        drop(guards);
        drop(gate);
        result?;

        for (key, ids) in expired {
            let Some(st) = self.get_stock(&key) else { continue };
            let mut guard = st.write().await;
            let pruned = guard.forget_bookings(&ids, &self.entity_to_stock);
            debug!(%key, pruned, "dropped expired bookings");
        }
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

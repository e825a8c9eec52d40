use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use dashmap::DashMap;
use tracing::error;
use ulid::Ulid;

use crate::model::*;

use super::index::BlockingIndex;
use super::ledger::Ledger;

/// Everything known about one (item, branch): ledger, blocking intervals, and the bookings and
/// maintenance windows that own those intervals.
#[derive(Debug, Clone)]
pub struct StockState {
    pub key: StockKey,
    /// Free days required between two bookings.
    pub turnaround_days: u32,
    pub ledger: Ledger,
    pub index: BlockingIndex,
    pub bookings: HashMap<Ulid, Booking>,
    pub maintenance: HashMap<Ulid, MaintenanceWindow>,
    /// Set when the stock is decommissioned while a caller still waits on its lock.
    pub retired: bool,
}

impl StockState {
    pub fn new(key: StockKey, quantity_total: u32, turnaround_days: u32) -> Self {
        Self {
            key,
            turnaround_days,
            ledger: Ledger::new(key, quantity_total),
            index: BlockingIndex::new(),
            bookings: HashMap::new(),
            maintenance: HashMap::new(),
            retired: false,
        }
    }

    pub fn capacity_on(&self, day: NaiveDate) -> CapacitySnapshot {
        self.ledger.snapshot_on(day)
    }

    pub fn info(&self) -> StockInfo {
        StockInfo {
            key: self.key,
            quantity_total: self.ledger.total(),
            turnaround_days: self.turnaround_days,
        }
    }

    /// Whether anything still holds capacity on this stock.
    pub fn has_commitments(&self) -> bool {
        !self.index.is_empty()
    }

    /// Compare the ledger against interval sums, day by day.
    pub fn reconcile(&self) -> Vec<LedgerDrift> {
        let mut expected: BTreeMap<NaiveDate, (u32, u32)> = BTreeMap::new();
        for interval in self.index.iter() {
            for day in interval.range.days() {
                let entry = expected.entry(day).or_default();
                if interval.kind.is_booking() {
                    entry.0 += interval.quantity_held;
                } else {
                    entry.1 += interval.quantity_held;
                }
            }
        }

        let mut drift = Vec::new();
        for (day, rented, maintenance) in self.ledger.committed_days() {
            let (index_rented, index_maintenance) = expected.remove(&day).unwrap_or_default();
            if (rented, maintenance) != (index_rented, index_maintenance) {
                drift.push(LedgerDrift {
                    day,
                    ledger_rented: rented,
                    index_rented,
                    ledger_maintenance: maintenance,
                    index_maintenance,
                });
            }
        }
        for (day, (index_rented, index_maintenance)) in expected {
            drift.push(LedgerDrift {
                day,
                ledger_rented: 0,
                index_rented,
                ledger_maintenance: 0,
                index_maintenance,
            });
        }
        drift.sort_by_key(|d| d.day);
        drift
    }

    /// Apply a stock-scoped event (no locking; caller holds the lock).
    ///
    /// Checks happen before the event is written, so a ledger failure here means the log holds
    /// an event memory cannot take. Such an event is logged, counted and skipped whole, so the
    /// ledger and the index never disagree.
    pub fn apply(&mut self, event: &Event, entity_map: &DashMap<Ulid, StockKey>) {
        match event {
            Event::StockAdjusted {
                quantity_total,
                turnaround_days,
                ..
            } => {
                if let Err(e) = self.ledger.set_total(*quantity_total) {
                    self.reject(format_args!("stock adjustment: {e}"));
                    return;
                }
                self.turnaround_days = *turnaround_days;
            }
            Event::BookingAdmitted { booking } => {
                if booking.status.holds_inventory() {
                    if let Err(e) = self.ledger.reserve(&booking.range, booking.quantity) {
                        self.reject(format_args!("admission of {}: {e}", booking.id));
                        return;
                    }
                    self.index.insert(booking.interval());
                }
                entity_map.insert(booking.id, self.key);
                self.bookings.insert(booking.id, booking.clone());
            }
            Event::BookingTransitioned { id, transition, .. } => {
                let Some(booking) = self.bookings.get_mut(id) else {
                    error!(key = %self.key, booking = %id, "transition for unknown booking");
                    return;
                };
                let released = booking.status.holds_inventory() && !transition.to.holds_inventory();
                booking.status = transition.to;
                booking.history.push(transition.clone());
                if released {
                    let (range, quantity) = (booking.range, booking.quantity);
                    self.index.remove(*id);
                    self.ledger.release(&range, quantity);
                }
            }
            Event::MaintenanceScheduled { window } => {
                if let Some(interval) = window.interval() {
                    if let Err(e) = self
                        .ledger
                        .hold_for_maintenance(&interval.range, interval.quantity_held)
                    {
                        self.reject(format_args!("maintenance {}: {e}", window.id));
                        return;
                    }
                    self.index.insert(interval);
                }
                entity_map.insert(window.id, self.key);
                self.maintenance.insert(window.id, window.clone());
            }
            Event::MaintenanceReleased { id, .. } => {
                if let Some(window) = self.maintenance.remove(id)
                    && let Some(interval) = self.index.remove(*id)
                {
                    self.ledger
                        .release_from_maintenance(&interval.range, window.quantity);
                }
                entity_map.remove(id);
            }
            // Provision/decommission are handled at the DashMap level, not here
            Event::StockProvisioned { .. } | Event::StockDecommissioned { .. } => {}
        }
    }

    fn reject(&self, what: std::fmt::Arguments<'_>) {
        metrics::counter!(crate::observability::APPLY_REJECTED_TOTAL).increment(1);
        error!(key = %self.key, "refusing to apply {what}");
    }

    /// Cancelled or returned bookings whose range ended before `horizon`.
    pub fn expired_bookings(&self, horizon: Option<NaiveDate>) -> Vec<Ulid> {
        let Some(horizon) = horizon else {
            return Vec::new();
        };
        self.bookings
            .values()
            .filter(|b| is_expired(b, horizon))
            .map(|b| b.id)
            .collect()
    }

    /// Drop terminal bookings from memory. Bookings still holding units are kept.
    pub fn forget_bookings(&mut self, ids: &[Ulid], entity_map: &DashMap<Ulid, StockKey>) -> usize {
        let mut forgotten = 0;
        for id in ids {
            if self.bookings.get(id).is_some_and(|b| !b.status.holds_inventory()) {
                self.bookings.remove(id);
                entity_map.remove(id);
                forgotten += 1;
            }
        }
        forgotten
    }

    /// Minimal events that recreate this stock, without bookings expired at `horizon`.
    pub fn snapshot_events(&self, horizon: Option<NaiveDate>) -> Vec<Event> {
        let mut events = vec![Event::StockProvisioned {
            key: self.key,
            quantity_total: self.ledger.total(),
            turnaround_days: self.turnaround_days,
        }];
        let mut bookings: Vec<&Booking> = self
            .bookings
            .values()
            .filter(|b| horizon.is_none_or(|h| !is_expired(b, h)))
            .collect();
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(|b| Event::BookingAdmitted { booking: b.clone() }));
        let mut windows: Vec<&MaintenanceWindow> = self.maintenance.values().collect();
        windows.sort_by_key(|w| w.id);
        events.extend(
            windows
                .into_iter()
                .map(|w| Event::MaintenanceScheduled { window: w.clone() }),
        );
        events
    }
}

fn is_expired(booking: &Booking, horizon: NaiveDate) -> bool {
    !booking.status.holds_inventory() && booking.range.end < horizon
}

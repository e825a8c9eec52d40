use std::collections::BTreeMap;

use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

use crate::model::{CapacitySnapshot, DateRange, StockKey};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("insufficient stock on {day}: requested {requested}, available {available}")]
    InsufficientStock {
        day: NaiveDate,
        requested: u32,
        available: u32,
    },
    #[error("cannot shrink total to {requested}: {committed} units committed on {day}")]
    BelowCommitted {
        day: NaiveDate,
        requested: u32,
        committed: u32,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct DayUsage {
    rented: u32,
    maintenance: u32,
}

impl DayUsage {
    fn committed(&self) -> u32 {
        self.rented + self.maintenance
    }

    fn is_empty(&self) -> bool {
        self.rented == 0 && self.maintenance == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Rented,
    Maintenance,
}

impl Bucket {
    fn slot(self, usage: &mut DayUsage) -> &mut u32 {
        match self {
            Bucket::Rented => &mut usage.rented,
            Bucket::Maintenance => &mut usage.maintenance,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Bucket::Rented => "rented",
            Bucket::Maintenance => "maintenance",
        }
    }
}

/// Per-day stock counts for one (item, branch).
///
/// Only days with commitments are stored; a missing day is fully available. Every mutation
/// keeps `total == available + rented + maintenance` for each day. Callers hold the stock's
/// write lock.
#[derive(Debug, Clone)]
pub struct Ledger {
    key: StockKey,
    total: u32,
    days: BTreeMap<NaiveDate, DayUsage>,
}

impl Ledger {
    pub fn new(key: StockKey, total: u32) -> Self {
        Self {
            key,
            total,
            days: BTreeMap::new(),
        }
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn snapshot_on(&self, day: NaiveDate) -> CapacitySnapshot {
        let usage = self.days.get(&day).copied().unwrap_or_default();
        CapacitySnapshot {
            total: self.total,
            available: self.total.saturating_sub(usage.committed()),
            rented: usage.rented,
            maintenance: usage.maintenance,
        }
    }

    /// Smallest available count over the range.
    pub fn min_available(&self, range: &DateRange) -> u32 {
        self.days
            .range(range.start..=range.end)
            .map(|(_, u)| self.total.saturating_sub(u.committed()))
            .min()
            .unwrap_or(self.total)
    }

    /// Largest committed count on any day.
    pub fn peak_committed(&self) -> (Option<NaiveDate>, u32) {
        self.days
            .iter()
            .map(|(day, u)| (Some(*day), u.committed()))
            .max_by_key(|(_, c)| *c)
            .unwrap_or((None, 0))
    }

    pub fn check(&self, range: &DateRange, quantity: u32) -> Result<(), LedgerError> {
        for (day, usage) in self.days.range(range.start..=range.end) {
            let available = self.total.saturating_sub(usage.committed());
            if available < quantity {
                return Err(LedgerError::InsufficientStock {
                    day: *day,
                    requested: quantity,
                    available,
                });
            }
        }
        if quantity > self.total {
            return Err(LedgerError::InsufficientStock {
                day: range.start,
                requested: quantity,
                available: self.total,
            });
        }
        Ok(())
    }

    pub fn reserve(&mut self, range: &DateRange, quantity: u32) -> Result<(), LedgerError> {
        self.check(range, quantity)?;
        self.add(range, quantity, Bucket::Rented);
        Ok(())
    }

    /// Returns the number of units that had to be clamped (0 when consistent).
    pub fn release(&mut self, range: &DateRange, quantity: u32) -> u32 {
        self.subtract(range, quantity, Bucket::Rented)
    }

    pub fn hold_for_maintenance(&mut self, range: &DateRange, quantity: u32) -> Result<(), LedgerError> {
        self.check(range, quantity)?;
        self.add(range, quantity, Bucket::Maintenance);
        Ok(())
    }

    pub fn release_from_maintenance(&mut self, range: &DateRange, quantity: u32) -> u32 {
        self.subtract(range, quantity, Bucket::Maintenance)
    }

    pub fn set_total(&mut self, total: u32) -> Result<(), LedgerError> {
        if let (Some(day), committed) = self.peak_committed()
            && committed > total
        {
            return Err(LedgerError::BelowCommitted {
                day,
                requested: total,
                committed,
            });
        }
        self.total = total;
        Ok(())
    }

    /// Per-day `(rented, maintenance)` for every day with commitments.
    pub fn committed_days(&self) -> impl Iterator<Item = (NaiveDate, u32, u32)> + '_ {
        self.days.iter().map(|(d, u)| (*d, u.rented, u.maintenance))
    }

    fn add(&mut self, range: &DateRange, quantity: u32, bucket: Bucket) {
        for day in range.days() {
            let usage = self.days.entry(day).or_default();
            *bucket.slot(usage) += quantity;
        }
    }

    fn subtract(&mut self, range: &DateRange, quantity: u32, bucket: Bucket) -> u32 {
        let mut clamped = 0;
        for day in range.days() {
            let usage = self.days.entry(day).or_default();
            let slot = bucket.slot(usage);
            if *slot < quantity {
                warn!(
                    key = %self.key,
                    %day,
                    bucket = bucket.label(),
                    held = *slot,
                    requested = quantity,
                    "ledger release below zero, clamping"
                );
                clamped += quantity - *slot;
                *slot = 0;
            } else {
                *slot -= quantity;
            }
            if usage.is_empty() {
                self.days.remove(&day);
            }
        }
        if clamped > 0 {
            metrics::counter!(crate::observability::LEDGER_ANOMALIES_TOTAL).increment(1);
        }
        clamped
    }
}

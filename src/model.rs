use std::fmt;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Closed calendar range `[start, end]`: a range from D1 to D2 occupies every day in between,
/// both ends included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    /// Touching ranges overlap: `[10, 15]` and `[15, 20]` share day 15.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    /// Billable days, end date exclusive.
    pub fn nights(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Calendar days touched, both ends inclusive.
    pub fn day_count(&self) -> i64 {
        self.nights() + 1
    }

    /// Extend both ends by `days`, saturating at the calendar limits.
    pub fn widen(&self, days: u32) -> DateRange {
        if days == 0 {
            return *self;
        }
        let d = Days::new(u64::from(days));
        DateRange {
            start: self.start.checked_sub_days(d).unwrap_or(NaiveDate::MIN),
            end: self.end.checked_add_days(d).unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.start.iter_days().take_while(move |d| *d <= self.end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// An (item, branch) pair: the unit of stock accounting and of locking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub item_id: Ulid,
    pub branch_id: Ulid,
}

impl StockKey {
    pub fn new(item_id: Ulid, branch_id: Ulid) -> Self {
        Self { item_id, branch_id }
    }
}

impl fmt::Display for StockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.item_id, self.branch_id)
    }
}

/// Catalog unit as supplied by the catalog collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentableItem {
    pub id: Ulid,
    pub price_per_day: Decimal,
    pub minimum_rental_days: u32,
}

/// Why capacity is removed for an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    Booking,
    Maintenance,
    Hygiene,
}

impl BlockKind {
    pub fn is_booking(self) -> bool {
        matches!(self, BlockKind::Booking)
    }
}

/// Capacity removed from availability over a date range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockingInterval {
    /// Id of the owning booking or maintenance window.
    pub reference_id: Ulid,
    pub range: DateRange,
    pub quantity_held: u32,
    pub kind: BlockKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Active,
    Completed,
    Cancelled,
    Returned,
}

impl BookingStatus {
    /// Whether a booking in this status still owns its blocking interval and ledger units.
    pub fn holds_inventory(self) -> bool {
        !matches!(self, BookingStatus::Cancelled | BookingStatus::Returned)
    }

    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Active)
                | (Active, Completed)
                | (Completed, Returned)
                | (Pending | Confirmed | Active, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Active => "active",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Returned => "returned",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: BookingStatus,
    pub to: BookingStatus,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub key: StockKey,
    pub range: DateRange,
    pub quantity: u32,
    /// Price snapshot taken at admission.
    pub price_per_day: Decimal,
    pub total_price: Decimal,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub history: Vec<Transition>,
}

impl Booking {
    pub fn interval(&self) -> BlockingInterval {
        BlockingInterval {
            reference_id: self.id,
            range: self.range,
            quantity_held: self.quantity,
            kind: BlockKind::Booking,
        }
    }

    /// Timestamp of the most recent status change.
    pub fn status_since(&self) -> DateTime<Utc> {
        self.history.last().map_or(self.created_at, |t| t.at)
    }
}

/// Maintenance or hygiene kind for a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaintenanceKind {
    Maintenance,
    Hygiene,
}

impl From<MaintenanceKind> for BlockKind {
    fn from(kind: MaintenanceKind) -> Self {
        match kind {
            MaintenanceKind::Maintenance => BlockKind::Maintenance,
            MaintenanceKind::Hygiene => BlockKind::Hygiene,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: Ulid,
    pub key: StockKey,
    pub kind: MaintenanceKind,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub quantity: u32,
    pub blocks_bookings: bool,
}

impl MaintenanceWindow {
    /// Calendar days touched by the window. An `ends_at` exactly at midnight does not
    /// block the day it lands on.
    pub fn blocked_days(&self) -> DateRange {
        let start = self.starts_at.date_naive();
        let mut end = self.ends_at.date_naive();
        if self.ends_at.time() == NaiveTime::MIN
            && end > start
            && let Some(prev) = end.pred_opt()
        {
            end = prev;
        }
        DateRange::new(start, end.max(start))
    }

    /// The interval this window contributes, if it blocks bookings at all.
    pub fn interval(&self) -> Option<BlockingInterval> {
        self.blocks_bookings.then(|| BlockingInterval {
            reference_id: self.id,
            range: self.blocked_days(),
            quantity_held: self.quantity,
            kind: self.kind.into(),
        })
    }
}

/// The event types. Flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StockProvisioned {
        key: StockKey,
        quantity_total: u32,
        turnaround_days: u32,
    },
    StockAdjusted {
        key: StockKey,
        quantity_total: u32,
        turnaround_days: u32,
    },
    StockDecommissioned {
        key: StockKey,
    },
    /// Booking record, its blocking interval and its ledger reservation in one record.
    BookingAdmitted {
        booking: Booking,
    },
    BookingTransitioned {
        id: Ulid,
        key: StockKey,
        transition: Transition,
    },
    MaintenanceScheduled {
        window: MaintenanceWindow,
    },
    MaintenanceReleased {
        id: Ulid,
        key: StockKey,
    },
}

impl Event {
    pub fn key(&self) -> StockKey {
        match self {
            Event::StockProvisioned { key, .. }
            | Event::StockAdjusted { key, .. }
            | Event::StockDecommissioned { key }
            | Event::BookingTransitioned { key, .. }
            | Event::MaintenanceReleased { key, .. } => *key,
            Event::BookingAdmitted { booking } => booking.key,
            Event::MaintenanceScheduled { window } => window.key,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

/// Ledger counts for one day. `total == available + rented + maintenance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySnapshot {
    pub total: u32,
    pub available: u32,
    pub rented: u32,
    pub maintenance: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockInfo {
    pub key: StockKey,
    pub quantity_total: u32,
    pub turnaround_days: u32,
}

/// A run of consecutive days sharing the same free quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpan {
    pub range: DateRange,
    pub free: u32,
}

/// A day where the ledger disagrees with the blocking intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerDrift {
    pub day: NaiveDate,
    pub ledger_rented: u32,
    pub index_rented: u32,
    pub ledger_maintenance: u32,
    pub index_maintenance: u32,
}

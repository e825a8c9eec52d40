use std::fmt;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;
use ulid::Ulid;

use crate::catalog::CatalogError;
use crate::model::{BookingStatus, StockKey};

/// What is wrong with a booking request. Each variant carries enough detail for a client to
/// correct the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidBooking {
    #[error("start date {start} is before today ({today})")]
    StartInPast { start: NaiveDate, today: NaiveDate },
    #[error("end date {end} must be after start date {start}")]
    EndNotAfterStart { start: NaiveDate, end: NaiveDate },
    #[error("rental of {days} days is shorter than the minimum of {minimum}")]
    BelowMinimumDays { days: i64, minimum: u32 },
    #[error("rental of {days} days exceeds the maximum of {maximum}")]
    TooLong { days: i64, maximum: i64 },
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    #[error("quantity {requested} exceeds the maximum of {maximum}")]
    QuantityTooLarge { requested: u32, maximum: u32 },
}

/// What is wrong with a maintenance window request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidMaintenance {
    #[error("ends_at {ends_at} must be after starts_at {starts_at}")]
    EndNotAfterStart {
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    },
    #[error("quantity {quantity} must be between 1 and {maximum}")]
    QuantityOutOfRange { quantity: u32, maximum: u32 },
}

/// The kind of entity a lookup failed to find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Item(Ulid),
    Stock(StockKey),
    Booking(Ulid),
    Maintenance(Ulid),
}

impl fmt::Display for Missing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Missing::Item(id) => write!(f, "item {id}"),
            Missing::Stock(key) => write!(f, "stock {key}"),
            Missing::Booking(id) => write!(f, "booking {id}"),
            Missing::Maintenance(id) => write!(f, "maintenance window {id}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid booking dates: {0}")]
    InvalidBookingDates(InvalidBooking),
    #[error("invalid maintenance window: {0}")]
    InvalidMaintenance(InvalidMaintenance),
    #[error("insufficient inventory for {key}: requested {requested}, available {available}")]
    InsufficientInventory {
        key: StockKey,
        requested: u32,
        available: u32,
    },
    #[error("invalid state transition for booking {id}: cannot move from {current} to {attempted}")]
    InvalidStateTransition {
        id: Ulid,
        current: BookingStatus,
        attempted: BookingStatus,
    },
    #[error("timed out after {waited:?} waiting for lock on {key}")]
    LockTimeout { key: StockKey, waited: Duration },
    #[error("not found: {0}")]
    NotFound(Missing),
    #[error("already exists: {0}")]
    AlreadyExists(Missing),
    #[error("stock {key} still has {committed} committed units")]
    StockInUse { key: StockKey, committed: u32 },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// Only lock contention may be retried as-is; every other error is permanent for the input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::LockTimeout { .. })
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::InvalidBookingDates(_) => "invalid_dates",
            EngineError::InvalidMaintenance(_) => "invalid_maintenance",
            EngineError::InsufficientInventory { .. } => "insufficient_inventory",
            EngineError::InvalidStateTransition { .. } => "invalid_transition",
            EngineError::LockTimeout { .. } => "lock_timeout",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::StockInUse { .. } => "stock_in_use",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Catalog(_) => "catalog",
            EngineError::WalError(_) => "wal",
        }
    }
}

impl From<InvalidBooking> for EngineError {
    fn from(e: InvalidBooking) -> Self {
        EngineError::InvalidBookingDates(e)
    }
}

impl From<InvalidMaintenance> for EngineError {
    fn from(e: InvalidMaintenance) -> Self {
        EngineError::InvalidMaintenance(e)
    }
}

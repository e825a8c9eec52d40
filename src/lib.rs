//! Date-range availability and booking admission for rental inventory.
//!
//! Each (item, branch) pair is tracked as a [`engine::StockState`]: a per-day ledger of
//! available, rented and maintenance units plus the blocking intervals that explain them.
//! Writes to one pair are serialized behind its own lock and recorded in a write-ahead log
//! before they are applied.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod tenant;
pub mod wal;

pub use catalog::{Catalog, CatalogError, InMemoryCatalog};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EngineConfig, EngineSettings};
pub use engine::{Engine, EngineError, InvalidBooking, InvalidMaintenance, Missing};
pub use notify::NotifyHub;
pub use tenant::TenantManager;

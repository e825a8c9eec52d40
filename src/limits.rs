//! Hard limits that bound memory and per-request work.

/// Stock keys (item, branch pairs) per tenant engine.
pub const MAX_STOCK_KEYS_PER_TENANT: usize = 100_000;

/// Blocking intervals held by a single stock key.
pub const MAX_INTERVALS_PER_STOCK: usize = 10_000;

/// Longest booking, in billable days.
pub const MAX_BOOKING_DAYS: i64 = 366;

/// Longest maintenance window, in calendar days.
pub const MAX_MAINTENANCE_DAYS: i64 = 366;

/// Units per booking, maintenance hold or stock provision.
pub const MAX_QUANTITY: u32 = 100_000;

/// Widest availability calendar query, in calendar days.
pub const MAX_QUERY_DAYS: i64 = 731;

/// Turnaround between bookings, in days.
pub const MAX_TURNAROUND_DAYS: u32 = 30;

pub const MAX_TENANTS: usize = 1024;

pub const MAX_TENANT_NAME_LEN: usize = 256;

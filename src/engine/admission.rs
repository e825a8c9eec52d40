use std::time::Instant;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::error::{InvalidBooking, Missing};
use super::resolver::available_quantity;
use super::state::StockState;
use super::{Engine, EngineError};

/// Date and quantity checks that need no stock state.
pub(crate) fn validate_booking(
    item: &RentableItem,
    start: NaiveDate,
    end: NaiveDate,
    quantity: u32,
    today: NaiveDate,
) -> Result<DateRange, InvalidBooking> {
    if end <= start {
        return Err(InvalidBooking::EndNotAfterStart { start, end });
    }
    if start < today {
        return Err(InvalidBooking::StartInPast { start, today });
    }
    if quantity == 0 {
        return Err(InvalidBooking::ZeroQuantity);
    }
    if quantity > MAX_QUANTITY {
        return Err(InvalidBooking::QuantityTooLarge {
            requested: quantity,
            maximum: MAX_QUANTITY,
        });
    }
    let range = DateRange::new(start, end);
    let days = range.nights();
    if days < i64::from(item.minimum_rental_days) {
        return Err(InvalidBooking::BelowMinimumDays {
            days,
            minimum: item.minimum_rental_days,
        });
    }
    if days > MAX_BOOKING_DAYS {
        return Err(InvalidBooking::TooLong {
            days,
            maximum: MAX_BOOKING_DAYS,
        });
    }
    Ok(range)
}

/// Price for the booking: per-day price times billable days (end date exclusive).
pub(crate) fn quote(price_per_day: Decimal, range: &DateRange) -> Decimal {
    price_per_day * Decimal::from(range.nights())
}

/// Authoritative capacity check; only meaningful while the stock's write lock is held.
pub(crate) fn check_capacity(
    st: &StockState,
    range: &DateRange,
    quantity: u32,
) -> Result<(), EngineError> {
    if st.index.len() >= MAX_INTERVALS_PER_STOCK {
        return Err(EngineError::LimitExceeded("too many intervals on stock"));
    }
    let available = available_quantity(st, range).min(st.ledger.min_available(range));
    if available < quantity {
        return Err(EngineError::InsufficientInventory {
            key: st.key,
            requested: quantity,
            available,
        });
    }
    Ok(())
}

impl Engine {
    /// Admit a booking: validate, lock the (item, branch), re-check capacity under the lock,
    /// then record booking, blocking interval and ledger reservation as one WAL event.
    pub async fn admit(
        &self,
        user_id: Ulid,
        item_id: Ulid,
        branch_id: Ulid,
        start: NaiveDate,
        end: NaiveDate,
        quantity: u32,
    ) -> Result<Booking, EngineError> {
        let started = Instant::now();
        let result = self
            .admit_inner(user_id, StockKey::new(item_id, branch_id), start, end, quantity)
            .await;
        let outcome = match &result {
            Ok(_) => "admitted",
            Err(e) => e.label(),
        };
        metrics::counter!(crate::observability::ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(crate::observability::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn admit_inner(
        &self,
        user_id: Ulid,
        key: StockKey,
        start: NaiveDate,
        end: NaiveDate,
        quantity: u32,
    ) -> Result<Booking, EngineError> {
        let item = self
            .catalog
            .rentable_item(key.item_id)
            .await?
            .ok_or(EngineError::NotFound(Missing::Item(key.item_id)))?;
        let range = validate_booking(&item, start, end, quantity, self.clock.today())?;

        let guard = self.lock_stock(&key).await?;
        if let Err(e) = check_capacity(&guard, &range, quantity) {
            debug!(%key, %range, quantity, "admission rejected: {e}");
            return Err(e);
        }

        let booking = Booking {
            id: Ulid::new(),
            user_id,
            key,
            range,
            quantity,
            price_per_day: item.price_per_day,
            total_price: quote(item.price_per_day, &range),
            status: BookingStatus::Pending,
            created_at: self.clock.now(),
            history: Vec::new(),
        };
        let event = Event::BookingAdmitted {
            booking: booking.clone(),
        };
        self.persist_and_apply(guard, event).await?;
        info!(%key, booking = %booking.id, %range, quantity, "booking admitted");
        Ok(booking)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, day).unwrap()
    }

    fn item(min_days: u32) -> RentableItem {
        RentableItem {
            id: Ulid::new(),
            price_per_day: Decimal::new(3000, 2),
            minimum_rental_days: min_days,
        }
    }

    #[test]
    fn end_before_start_rejected() {
        let err = validate_booking(&item(1), d(1, 10), d(1, 9), 1, d(1, 1)).unwrap_err();
        assert_eq!(
            err,
            InvalidBooking::EndNotAfterStart {
                start: d(1, 10),
                end: d(1, 9)
            }
        );
    }

    #[test]
    fn same_day_rejected() {
        assert!(matches!(
            validate_booking(&item(0), d(1, 10), d(1, 10), 1, d(1, 1)),
            Err(InvalidBooking::EndNotAfterStart { .. })
        ));
    }

    #[test]
    fn start_in_past_rejected() {
        let err = validate_booking(&item(1), d(1, 1), d(1, 5), 1, d(1, 2)).unwrap_err();
        assert!(matches!(err, InvalidBooking::StartInPast { .. }));
        // Starting today is fine
        assert!(validate_booking(&item(1), d(1, 2), d(1, 5), 1, d(1, 2)).is_ok());
    }

    #[test]
    fn quantity_bounds() {
        assert_eq!(
            validate_booking(&item(1), d(1, 2), d(1, 5), 0, d(1, 1)),
            Err(InvalidBooking::ZeroQuantity)
        );
        assert!(matches!(
            validate_booking(&item(1), d(1, 2), d(1, 5), MAX_QUANTITY + 1, d(1, 1)),
            Err(InvalidBooking::QuantityTooLarge { .. })
        ));
    }

    #[test]
    fn minimum_rental_days() {
        assert_eq!(
            validate_booking(&item(3), d(1, 2), d(1, 4), 1, d(1, 1)),
            Err(InvalidBooking::BelowMinimumDays { days: 2, minimum: 3 })
        );
        assert!(validate_booking(&item(3), d(1, 2), d(1, 5), 1, d(1, 1)).is_ok());
    }

    #[test]
    fn too_long_rejected() {
        assert!(matches!(
            validate_booking(&item(1), d(1, 2), d(12, 31).checked_add_days(chrono::Days::new(10)).unwrap(), 1, d(1, 1)),
            Err(InvalidBooking::TooLong { .. })
        ));
    }

    #[test]
    fn quote_bills_end_exclusive() {
        let range = DateRange::new(d(1, 10), d(1, 15));
        assert_eq!(quote(Decimal::new(3000, 2), &range), Decimal::new(15000, 2));
    }
}

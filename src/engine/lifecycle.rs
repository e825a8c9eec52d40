use chrono::{DateTime, Utc};
use tracing::info;
use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Pending → Confirmed.
    pub async fn confirm(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Confirmed).await
    }

    /// Confirmed → Active, at pickup.
    pub async fn start(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Active).await
    }

    /// Active → Completed. The units stay held until the return is processed.
    pub async fn complete(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Completed).await
    }

    /// Pending, Confirmed or Active → Cancelled. Releases the interval and the ledger units.
    pub async fn cancel(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Cancelled).await
    }

    /// Completed → Returned. Releases the interval and the ledger units.
    pub async fn process_return(&self, booking_id: Ulid) -> Result<Booking, EngineError> {
        self.transition(booking_id, BookingStatus::Returned).await
    }

    async fn transition(&self, booking_id: Ulid, to: BookingStatus) -> Result<Booking, EngineError> {
        let guard = self.resolve_booking_write(&booking_id).await?;
        let current = guard
            .bookings
            .get(&booking_id)
            .map(|b| b.status)
            .ok_or(EngineError::NotFound(super::Missing::Booking(booking_id)))?;
        if !current.can_transition_to(to) {
            return Err(EngineError::InvalidStateTransition {
                id: booking_id,
                current,
                attempted: to,
            });
        }

        let key = guard.key;
        let event = Event::BookingTransitioned {
            id: booking_id,
            key,
            transition: Transition {
                from: current,
                to,
                at: self.clock.now(),
            },
        };
        let guard = self.persist_and_apply(guard, event).await?;
        metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "to" => to.as_str()).increment(1);
        info!(%key, booking = %booking_id, from = %current, %to, "booking transitioned");

        guard
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(super::Missing::Booking(booking_id)))
    }

    /// Pending bookings whose last status change happened before `cutoff`.
    pub async fn collect_stale_pending(&self, cutoff: DateTime<Utc>) -> Vec<Ulid> {
        let stocks: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut stale = Vec::new();
        for st in stocks {
            let guard = st.read().await;
            stale.extend(
                guard
                    .bookings
                    .values()
                    .filter(|b| b.status == BookingStatus::Pending && b.status_since() < cutoff)
                    .map(|b| b.id),
            );
        }
        stale
    }
}

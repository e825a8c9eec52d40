use tracing::info;
use ulid::Ulid;

use crate::limits::{MAX_INTERVALS_PER_STOCK, MAX_MAINTENANCE_DAYS, MAX_QUANTITY};
use crate::model::*;

use super::error::{InvalidMaintenance, Missing};
use super::resolver::available_for_maintenance;
use super::{Engine, EngineError};

impl Engine {
    /// Take units out of service for a window. Windows that block bookings must fit in the
    /// capacity left by existing holds.
    pub async fn schedule_maintenance(
        &self,
        window: MaintenanceWindow,
    ) -> Result<MaintenanceWindow, EngineError> {
        if window.ends_at <= window.starts_at {
            return Err(InvalidMaintenance::EndNotAfterStart {
                starts_at: window.starts_at,
                ends_at: window.ends_at,
            }
            .into());
        }
        if window.quantity == 0 || window.quantity > MAX_QUANTITY {
            return Err(InvalidMaintenance::QuantityOutOfRange {
                quantity: window.quantity,
                maximum: MAX_QUANTITY,
            }
            .into());
        }
        let days = window.blocked_days();
        if days.day_count() > MAX_MAINTENANCE_DAYS {
            return Err(EngineError::LimitExceeded("maintenance window too long"));
        }
        if self.entity_to_stock.contains_key(&window.id) {
            return Err(EngineError::AlreadyExists(Missing::Maintenance(window.id)));
        }

        let guard = self.lock_stock(&window.key).await?;
        if window.blocks_bookings {
            if guard.index.len() >= MAX_INTERVALS_PER_STOCK {
                return Err(EngineError::LimitExceeded("too many intervals on stock"));
            }
            let available =
                available_for_maintenance(&guard, &days).min(guard.ledger.min_available(&days));
            if available < window.quantity {
                return Err(EngineError::InsufficientInventory {
                    key: window.key,
                    requested: window.quantity,
                    available,
                });
            }
        }

        let event = Event::MaintenanceScheduled {
            window: window.clone(),
        };
        self.persist_and_apply(guard, event).await?;
        info!(
            key = %window.key,
            window = %window.id,
            range = %days,
            quantity = window.quantity,
            blocks = window.blocks_bookings,
            "maintenance scheduled"
        );
        Ok(window)
    }

    /// Return a window's units to service.
    pub async fn release_maintenance(&self, window_id: Ulid) -> Result<MaintenanceWindow, EngineError> {
        let key = self
            .get_stock_for_entity(&window_id)
            .ok_or(EngineError::NotFound(Missing::Maintenance(window_id)))?;
        let guard = self.lock_stock(&key).await?;
        let window = guard
            .maintenance
            .get(&window_id)
            .cloned()
            .ok_or(EngineError::NotFound(Missing::Maintenance(window_id)))?;

        let event = Event::MaintenanceReleased { id: window_id, key };
        self.persist_and_apply(guard, event).await?;
        info!(%key, window = %window_id, "maintenance released");
        Ok(window)
    }
}

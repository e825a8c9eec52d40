use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::error::Missing;
use super::state::StockState;
use super::{Engine, EngineError};

fn check_stock_limits(quantity_total: u32, turnaround_days: u32) -> Result<(), EngineError> {
    if quantity_total > MAX_QUANTITY {
        return Err(EngineError::LimitExceeded("stock quantity too large"));
    }
    if turnaround_days > MAX_TURNAROUND_DAYS {
        return Err(EngineError::LimitExceeded("turnaround too long"));
    }
    Ok(())
}

impl Engine {
    /// Register `quantity_total` units of an item at a branch. `turnaround_days` falls back to
    /// the engine default.
    pub async fn provision_stock(
        &self,
        item_id: Ulid,
        branch_id: Ulid,
        quantity_total: u32,
        turnaround_days: Option<u32>,
    ) -> Result<StockInfo, EngineError> {
        let key = StockKey::new(item_id, branch_id);
        let turnaround_days = turnaround_days.unwrap_or(self.settings.default_turnaround_days);
        check_stock_limits(quantity_total, turnaround_days)?;
        if self.state.len() >= MAX_STOCK_KEYS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many stock keys"));
        }
        if self.catalog.rentable_item(item_id).await?.is_none() {
            return Err(EngineError::NotFound(Missing::Item(item_id)));
        }

        // Publish the entry already write-locked so nobody books against it before the WAL has it
        let st = Arc::new(RwLock::new(StockState::new(key, quantity_total, turnaround_days)));
        let guard = st
            .clone()
            .try_write_owned()
            .map_err(|_| EngineError::WalError("fresh stock lock contended".into()))?;
        {
            // Compaction scans under the exclusive side; once published, the locked entry makes
            // it wait for this commit.
            let _gate = self.provision_gate.read().await;
            match self.state.entry(key) {
                Entry::Occupied(_) => return Err(EngineError::AlreadyExists(Missing::Stock(key))),
                Entry::Vacant(slot) => {
                    slot.insert(st);
                }
            }
        }

        let event = Event::StockProvisioned {
            key,
            quantity_total,
            turnaround_days,
        };
        let guard = self.persist_and_apply(guard, event).await?;
        info!(%key, quantity_total, turnaround_days, "stock provisioned");
        Ok(guard.info())
    }

    /// Change total units or turnaround. Shrinking below what is committed on any day fails
    /// with `StockInUse`.
    pub async fn adjust_stock(
        &self,
        item_id: Ulid,
        branch_id: Ulid,
        quantity_total: u32,
        turnaround_days: Option<u32>,
    ) -> Result<StockInfo, EngineError> {
        let key = StockKey::new(item_id, branch_id);
        let guard = self.lock_stock(&key).await?;
        let turnaround_days = turnaround_days.unwrap_or(guard.turnaround_days);
        check_stock_limits(quantity_total, turnaround_days)?;

        let (_, committed) = guard.ledger.peak_committed();
        if committed > quantity_total {
            return Err(EngineError::StockInUse { key, committed });
        }

        let event = Event::StockAdjusted {
            key,
            quantity_total,
            turnaround_days,
        };
        let guard = self.persist_and_apply(guard, event).await?;
        info!(%key, quantity_total, turnaround_days, "stock adjusted");
        Ok(guard.info())
    }

    /// Remove an (item, branch) entirely. Fails with `StockInUse` while any booking or
    /// blocking window still holds units.
    pub async fn decommission_stock(&self, item_id: Ulid, branch_id: Ulid) -> Result<(), EngineError> {
        let key = StockKey::new(item_id, branch_id);
        let guard = self.lock_stock(&key).await?;
        if guard.has_commitments() {
            let (_, committed) = guard.ledger.peak_committed();
            return Err(EngineError::StockInUse { key, committed });
        }

        self.persist_and_apply(guard, Event::StockDecommissioned { key })
            .await?;
        info!(%key, "stock decommissioned");
        Ok(())
    }
}

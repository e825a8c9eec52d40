mod admission;
mod error;
mod index;
mod ledger;
mod lifecycle;
mod maintenance;
mod queries;
pub mod resolver;
mod state;
mod stock;

pub use error::{EngineError, InvalidBooking, InvalidMaintenance, Missing};
pub use index::BlockingIndex;
pub use ledger::{Ledger, LedgerError};
pub use state::StockState;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::catalog::Catalog;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineSettings;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedStockState = Arc<RwLock<StockState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break, // channel empty, flush batch
                    }
                }

                commit_batch(&mut wal, &mut batch);
                // Non-append commands run after the batch ahead of them is durable
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// Everything a commit touches, cloned out of the engine so the commit can run as its own task.
#[derive(Clone)]
struct Committer {
    wal_tx: mpsc::Sender<WalCommand>,
    state: Arc<DashMap<StockKey, SharedStockState>>,
    entity_to_stock: Arc<DashMap<Ulid, StockKey>>,
    notify: Arc<NotifyHub>,
}

impl Committer {
    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply, notify. The guard is held until memory matches the log.
    async fn commit(
        self,
        mut guard: OwnedRwLockWriteGuard<StockState>,
        event: Event,
    ) -> Result<OwnedRwLockWriteGuard<StockState>, EngineError> {
        let key = guard.key;
        match &event {
            Event::StockProvisioned { .. } => {
                // The entry was published before the append; take it back out on failure
                if let Err(e) = self.wal_append(&event).await {
                    guard.retired = true;
                    self.state.remove(&key);
                    return Err(e);
                }
                self.notify.send(key, &event);
            }
            Event::StockDecommissioned { .. } => {
                self.wal_append(&event).await?;
                guard.retired = true;
                self.state.remove(&key);
                forget_entities(&self.entity_to_stock, &guard);
                self.notify.send(key, &event);
                self.notify.remove(&key);
            }
            _ => {
                self.wal_append(&event).await?;
                guard.apply(&event, &self.entity_to_stock);
                self.notify.send(key, &event);
            }
        }
        Ok(guard)
    }
}

/// Drop the reverse-lookup entries of every booking and window on a stock.
fn forget_entities(entity_map: &DashMap<Ulid, StockKey>, st: &StockState) {
    for id in st.bookings.keys().chain(st.maintenance.keys()) {
        entity_map.remove(id);
    }
}

/// Booking and availability engine for one tenant.
///
/// Each (item, branch) pair lives behind its own `RwLock`; every write path takes that write
/// lock (bounded by `lock_timeout`), checks, appends one WAL event and applies it before
/// releasing. Unrelated keys never contend.
pub struct Engine {
    pub state: Arc<DashMap<StockKey, SharedStockState>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) catalog: Arc<dyn Catalog>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) settings: EngineSettings,
    /// Reverse lookup: booking / maintenance window id → stock key
    pub(super) entity_to_stock: Arc<DashMap<Ulid, StockKey>>,
    /// Shared by provisioning while it publishes a stock, exclusive for a compaction snapshot.
    pub(super) provision_gate: RwLock<()>,
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        catalog: Arc<dyn Catalog>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: Arc::new(DashMap::new()),
            wal_tx,
            notify,
            catalog,
            clock: Arc::new(SystemClock),
            settings,
            entity_to_stock: Arc::new(DashMap::new()),
            provision_gate: RwLock::new(()),
        };

        // Replay events. We are the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here because this may run
        // inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::StockProvisioned {
                    key,
                    quantity_total,
                    turnaround_days,
                } => {
                    let st = StockState::new(*key, *quantity_total, *turnaround_days);
                    engine.state.insert(*key, Arc::new(RwLock::new(st)));
                }
                Event::StockDecommissioned { key } => {
                    if let Some((_, st)) = engine.state.remove(key)
                        && let Ok(guard) = st.try_read()
                    {
                        forget_entities(&engine.entity_to_stock, &guard);
                    }
                }
                other => {
                    let key = other.key();
                    let Some(entry) = engine.state.get(&key).map(|e| e.value().clone()) else {
                        warn!(%key, "replay: event for unknown stock, skipping");
                        continue;
                    };
                    match entry.try_write() {
                        Ok(mut guard) => guard.apply(other, &engine.entity_to_stock),
                        Err(_) => warn!(%key, "replay: stock unexpectedly locked, skipping event"),
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Replace the clock used for "today" and transition timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Current time according to the engine's clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    pub fn get_stock(&self, key: &StockKey) -> Option<SharedStockState> {
        self.state.get(key).map(|e| e.value().clone())
    }

    pub fn get_stock_for_entity(&self, entity_id: &Ulid) -> Option<StockKey> {
        self.entity_to_stock.get(entity_id).map(|e| *e.value())
    }

    fn committer(&self) -> Committer {
        Committer {
            wal_tx: self.wal_tx.clone(),
            state: self.state.clone(),
            entity_to_stock: self.entity_to_stock.clone(),
            notify: self.notify.clone(),
        }
    }

    /// WAL-append + apply + notify, handing the guard back afterwards.
    ///
    /// Runs in a spawned task that owns the guard: a caller that stops waiting cannot leave an
    /// event in the log that memory never saw.
    pub(super) async fn persist_and_apply(
        &self,
        guard: OwnedRwLockWriteGuard<StockState>,
        event: Event,
    ) -> Result<OwnedRwLockWriteGuard<StockState>, EngineError> {
        tokio::spawn(self.committer().commit(guard, event))
            .await
            .map_err(|e| EngineError::WalError(format!("commit task failed: {e}")))?
    }

    /// Acquire a stock key's write lock, waiting at most `lock_timeout`.
    pub(super) async fn lock_stock(
        &self,
        key: &StockKey,
    ) -> Result<OwnedRwLockWriteGuard<StockState>, EngineError> {
        let st = self
            .get_stock(key)
            .ok_or(EngineError::NotFound(Missing::Stock(*key)))?;
        let wait_start = Instant::now();
        let guard = match tokio::time::timeout(self.settings.lock_timeout, st.write_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                warn!(%key, timeout = ?self.settings.lock_timeout, "gave up waiting for stock lock");
                return Err(EngineError::LockTimeout {
                    key: *key,
                    waited: self.settings.lock_timeout,
                });
            }
        };
        metrics::histogram!(crate::observability::LOCK_WAIT_SECONDS)
            .record(wait_start.elapsed().as_secs_f64());
        if guard.retired {
            return Err(EngineError::NotFound(Missing::Stock(*key)));
        }
        Ok(guard)
    }

    /// Lookup booking → stock, acquire the stock's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<StockState>, EngineError> {
        let key = self
            .get_stock_for_entity(booking_id)
            .ok_or(EngineError::NotFound(Missing::Booking(*booking_id)))?;
        let guard = self.lock_stock(&key).await?;
        if !guard.bookings.contains_key(booking_id) {
            return Err(EngineError::NotFound(Missing::Booking(*booking_id)));
        }
        Ok(guard)
    }
}

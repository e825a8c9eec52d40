use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, StockKey};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of applied events, one channel per stock key. Caches subscribe to the keys
/// they hold and invalidate exactly those.
pub struct NotifyHub {
    channels: DashMap<StockKey, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a stock key. Creates the channel if needed.
    pub fn subscribe(&self, key: StockKey) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, key: StockKey, event: &Event) {
        if let Some(sender) = self.channels.get(&key) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when stock is decommissioned). Receivers see the channel close.
    pub fn remove(&self, key: &StockKey) {
        self.channels.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let key = StockKey::new(Ulid::new(), Ulid::new());
        let mut rx = hub.subscribe(key);

        let event = Event::StockProvisioned {
            key,
            quantity_total: 2,
            turnaround_days: 0,
        };
        hub.send(key, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn other_keys_not_delivered() {
        let hub = NotifyHub::new();
        let watched = StockKey::new(Ulid::new(), Ulid::new());
        let other = StockKey::new(watched.item_id, Ulid::new());
        let mut rx = hub.subscribe(watched);

        hub.send(other, &Event::StockDecommissioned { key: other });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let key = StockKey::new(Ulid::new(), Ulid::new());
        // No subscriber, should not panic
        hub.send(key, &Event::StockDecommissioned { key });
    }

    #[tokio::test]
    async fn remove_closes_channel() {
        let hub = NotifyHub::new();
        let key = StockKey::new(Ulid::new(), Ulid::new());
        let mut rx = hub.subscribe(key);
        hub.remove(&key);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}

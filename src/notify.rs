use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-subscription event streams. The messaging layer
/// subscribes to render vacancy-update mails and live dashboards.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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

    /// Subscribe to notifications for a subscription. Creates the channel if needed.
    pub fn subscribe(&self, subscription_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(subscription_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, subscription_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&subscription_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a client closes their account).
    pub fn remove(&self, subscription_id: &Ulid) {
        self.channels.remove(subscription_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let sub_id = Ulid::new();
        let mut rx = hub.subscribe(sub_id);

        let event = Event::ListingVerified {
            id: Ulid::new(),
            subscription_id: sub_id,
            amount: 50,
        };
        hub.send(sub_id, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let sub_id = Ulid::new();
        // No subscriber — should not panic
        hub.send(
            sub_id,
            &Event::ListingRejected {
                id: Ulid::new(),
                subscription_id: sub_id,
            },
        );
    }
}

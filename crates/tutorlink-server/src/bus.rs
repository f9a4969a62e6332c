//! Server-side publish/subscribe delivery bus.
//!
//! One channel per user (personal) and one per group. Delivery is
//! at-least-once and best-effort: nothing is queued for offline sessions,
//! which recover missed messages through the history-fetch API instead.
//!
//! The subscription table is the only server-side resource mutated by
//! concurrent requests. All mutation happens under the write half of an
//! `RwLock`, so a concurrent `publish` observes either the pre- or
//! post-mutation subscriber set, never a partially updated one. Per-channel
//! FIFO holds because each subscriber is an mpsc queue fed in publish order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

use tutorlink_shared::protocol::ServerEvent;
use tutorlink_shared::types::ChannelId;

/// Handle returned by [`DeliveryBus::subscribe`]. Pass it back to
/// [`DeliveryBus::unsubscribe`] to detach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    channel: ChannelId,
    id: Uuid,
}

#[derive(Clone)]
pub struct DeliveryBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    /// channel -> subscription id -> event sink
    channels: RwLock<HashMap<ChannelId, HashMap<Uuid, mpsc::UnboundedSender<ServerEvent>>>>,

    /// Presence fan-out: every live gateway connection listens here.
    presence_tx: broadcast::Sender<ServerEvent>,
}

impl DeliveryBus {
    pub fn new() -> Self {
        let (presence_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(BusInner {
                channels: RwLock::new(HashMap::new()),
                presence_tx,
            }),
        }
    }

    /// Attach `tx` as a subscriber of `channel`.
    pub async fn subscribe(
        &self,
        channel: ChannelId,
        tx: mpsc::UnboundedSender<ServerEvent>,
    ) -> SubscriptionHandle {
        let id = Uuid::new_v4();
        self.inner
            .channels
            .write()
            .await
            .entry(channel)
            .or_default()
            .insert(id, tx);

        debug!(channel = %channel, subscription = %id, "subscribed");
        SubscriptionHandle { channel, id }
    }

    /// Detach a subscription. Unknown handles are ignored.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let mut channels = self.inner.channels.write().await;
        if let Some(subs) = channels.get_mut(&handle.channel) {
            subs.remove(&handle.id);
            if subs.is_empty() {
                channels.remove(&handle.channel);
            }
        }
        debug!(channel = %handle.channel, subscription = %handle.id, "unsubscribed");
    }

    /// Publish an event to every current subscriber of `channel`. Returns
    /// the number of subscribers the event was handed to. Subscribers whose
    /// receiving side has gone away are dropped silently; their gateway
    /// task cleans up on disconnect.
    pub async fn publish(&self, channel: &ChannelId, event: ServerEvent) -> usize {
        let channels = self.inner.channels.read().await;
        let Some(subs) = channels.get(channel) else {
            trace!(channel = %channel, "publish to channel with no subscribers");
            return 0;
        };

        let mut delivered = 0;
        for tx in subs.values() {
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }

        trace!(channel = %channel, delivered, "event published");
        delivered
    }

    /// Broadcast a presence transition to every live connection.
    pub fn publish_presence(&self, event: ServerEvent) {
        let _ = self.inner.presence_tx.send(event);
    }

    /// Listen for presence transitions.
    pub fn subscribe_presence(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.presence_tx.subscribe()
    }

    /// Number of live subscriptions on a channel (diagnostics).
    pub async fn subscriber_count(&self, channel: &ChannelId) -> usize {
        self.inner
            .channels
            .read()
            .await
            .get(channel)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Default for DeliveryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutorlink_shared::types::UserId;

    fn presence(online: bool) -> ServerEvent {
        ServerEvent::PresenceUpdated {
            user_id: UserId::new(),
            online,
        }
    }

    #[tokio::test]
    async fn publish_reaches_only_channel_subscribers() {
        let bus = DeliveryBus::new();
        let target = ChannelId::User(UserId::new());
        let other = ChannelId::User(UserId::new());

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        bus.subscribe(target, tx1).await;
        bus.subscribe(other, tx2).await;

        let delivered = bus.publish(&target, presence(true)).await;
        assert_eq!(delivered, 1);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = DeliveryBus::new();
        let channel = ChannelId::User(UserId::new());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = bus.subscribe(channel, tx).await;
        assert_eq!(bus.subscriber_count(&channel).await, 1);

        bus.unsubscribe(&handle).await;
        assert_eq!(bus.subscriber_count(&channel).await, 0);

        let delivered = bus.publish(&channel, presence(false)).await;
        assert_eq!(delivered, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn single_channel_delivery_is_fifo() {
        let bus = DeliveryBus::new();
        let channel = ChannelId::User(UserId::new());
        let user = UserId::new();

        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(channel, tx).await;

        for online in [true, false, true] {
            bus.publish(&channel, ServerEvent::PresenceUpdated { user_id: user, online })
                .await;
        }

        let mut seen = Vec::new();
        while let Ok(ServerEvent::PresenceUpdated { online, .. }) = rx.try_recv() {
            seen.push(online);
        }
        assert_eq!(seen, vec![true, false, true]);
    }

    #[tokio::test]
    async fn dead_subscribers_do_not_count_as_delivered() {
        let bus = DeliveryBus::new();
        let channel = ChannelId::User(UserId::new());

        let (tx, rx) = mpsc::unbounded_channel();
        bus.subscribe(channel, tx).await;
        drop(rx);

        let delivered = bus.publish(&channel, presence(true)).await;
        assert_eq!(delivered, 0);
    }
}

//! Event bus broadcasting collection changes.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use super::types::{
    ChangeEvent, DropReason, NestEvent, SubscriptionConfig, SubscriptionId, Topic, TopicFilter,
};

type Handler = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Internal channel subscription state.
struct ChannelSub {
    filter: TopicFilter,
    sender: Sender<NestEvent>,
}

impl ChannelSub {
    /// Try to send an event. Returns false if the buffer is full or the
    /// receiver is gone (subscriber will be dropped).
    fn try_send(&self, event: NestEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }
}

/// Internal callback registration.
struct CallbackSub {
    filter: TopicFilter,
    handler: Handler,
}

struct BusInner {
    channels: RwLock<HashMap<SubscriptionId, ChannelSub>>,
    callbacks: RwLock<HashMap<SubscriptionId, CallbackSub>>,
    next_id: AtomicU64,
    default_buffer_size: usize,
}

impl BusInner {
    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn remove_channel(&self, id: SubscriptionId) {
        if let Some(sub) = self.channels.write().remove(&id) {
            // Best effort; the receiver may be the thing being dropped.
            let _ = sub.sender.try_send(NestEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    fn remove_callback(&self, id: SubscriptionId) {
        self.callbacks.write().remove(&id);
    }
}

/// Publishes [`ChangeEvent`]s to subscribers. Cloning shares the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create a new bus.
    pub fn new() -> Self {
        Self::with_buffer_size(SubscriptionConfig::default().buffer_size)
    }

    /// Create a bus whose [`subscribe_to`](Self::subscribe_to) channels hold
    /// `buffer_size` events.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                channels: RwLock::new(HashMap::new()),
                callbacks: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                default_buffer_size: buffer_size.max(1),
            }),
        }
    }

    /// Create a channel subscription.
    pub fn subscribe(&self, config: SubscriptionConfig) -> Subscription {
        let id = self.inner.next_id();
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.inner.channels.write().insert(
            id,
            ChannelSub {
                filter: config.filter,
                sender,
            },
        );

        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe to one topic with the bus's default buffer size.
    pub fn subscribe_to(&self, topic: Topic) -> Subscription {
        self.subscribe(SubscriptionConfig {
            buffer_size: self.inner.default_buffer_size,
            filter: TopicFilter::only(topic),
        })
    }

    /// Register a callback run synchronously for every matching event.
    ///
    /// The callback must not block; it runs on the publishing thread.
    pub fn listen<F>(&self, filter: TopicFilter, handler: F) -> Listener
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        self.inner.callbacks.write().insert(
            id,
            CallbackSub {
                filter,
                handler: Arc::new(handler),
            },
        );

        Listener {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Number of live channel subscriptions and listeners.
    pub fn subscription_count(&self) -> usize {
        self.inner.channels.read().len() + self.inner.callbacks.read().len()
    }

    /// Deliver an event to every matching subscriber.
    ///
    /// Channel subscribers whose buffer is full are dropped.
    pub fn publish(&self, event: ChangeEvent) {
        tracing::debug!(topic = %event.topic, change = ?event.change, "publish");

        let mut to_remove = Vec::new();
        {
            let channels = self.inner.channels.read();
            for (id, sub) in channels.iter() {
                if sub.filter.matches(event.topic)
                    && !sub.try_send(NestEvent::Changed(event.clone()))
                {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut channels = self.inner.channels.write();
            for id in to_remove {
                if let Some(sub) = channels.remove(&id) {
                    tracing::warn!(subscription = id.0, "dropping slow subscriber");
                    let _ = sub.sender.try_send(NestEvent::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }

        // Handlers run without the lock held so they may subscribe or drop
        // listeners themselves.
        let handlers: Vec<Handler> = self
            .inner
            .callbacks
            .read()
            .values()
            .filter(|sub| sub.filter.matches(event.topic))
            .map(|sub| Arc::clone(&sub.handler))
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel subscription handle. Unsubscribes on drop.
pub struct Subscription {
    id: SubscriptionId,
    receiver: Receiver<NestEvent>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<NestEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<NestEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> Result<NestEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Take every change event currently buffered.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        self.receiver
            .try_iter()
            .filter_map(|event| match event {
                NestEvent::Changed(change) => Some(change),
                NestEvent::Dropped { .. } => None,
            })
            .collect()
    }

    /// Unsubscribe now instead of at drop.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_channel(self.id);
        }
    }
}

/// Callback registration handle. Unregisters on drop.
pub struct Listener {
    id: SubscriptionId,
    bus: Weak<BusInner>,
}

impl Listener {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Unregister now instead of at drop.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_callback(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Change;
    use crate::types::RecordId;
    use std::sync::atomic::AtomicUsize;

    fn pets_added(id: &str) -> ChangeEvent {
        ChangeEvent::new(Topic::Pets, Change::Added { id: RecordId::from(id) })
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let bus = EventBus::new();

        let sub = bus.subscribe(SubscriptionConfig::default());
        assert_eq!(bus.subscription_count(), 1);

        sub.unsubscribe();
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_drop_releases_subscription() {
        let bus = EventBus::new();
        {
            let _sub = bus.subscribe_to(Topic::Pets);
            let _listener = bus.listen(TopicFilter::all(), |_| {});
            assert_eq!(bus.subscription_count(), 2);
        }
        assert_eq!(bus.subscription_count(), 0);
    }

    #[test]
    fn test_broadcast_to_matching() {
        let bus = EventBus::new();
        let sub = bus.subscribe_to(Topic::Pets);

        bus.publish(pets_added("1"));

        let event = sub.recv_timeout(Duration::from_millis(100)).unwrap();
        match event {
            NestEvent::Changed(change) => {
                assert_eq!(change.topic, Topic::Pets);
                assert_eq!(change.change, Change::Added { id: RecordId::from("1") });
            }
            other => panic!("Expected Changed event, got {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_filters_non_matching() {
        let bus = EventBus::new();
        let sub = bus.subscribe_to(Topic::Feed);

        bus.publish(pets_added("1"));

        let result = sub.recv_timeout(Duration::from_millis(50));
        assert!(result.is_err());
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let bus = EventBus::new();
        let sub = bus.subscribe(SubscriptionConfig {
            buffer_size: 2,
            filter: TopicFilter::all(),
        });

        for i in 0..10 {
            bus.publish(pets_added(&i.to_string()));
        }

        assert_eq!(bus.subscription_count(), 0);
        // The two buffered events are still readable.
        assert_eq!(sub.drain().len(), 2);
    }

    #[test]
    fn test_listener_invoked_once_per_publish() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let listener = bus.listen(TopicFilter::only(Topic::Pets), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(pets_added("1"));
        bus.publish(ChangeEvent::new(Topic::Feed, Change::Replaced));
        bus.publish(pets_added("2"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        listener.unsubscribe();
        bus.publish(pets_added("3"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_handle_outliving_bus() {
        let sub = {
            let bus = EventBus::new();
            bus.subscribe_to(Topic::Pets)
        };
        // Bus is gone; dropping the handle must not panic.
        drop(sub);
    }
}

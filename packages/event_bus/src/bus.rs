use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::event::Event;
use crate::filter::Filter;

pub type SubscriptionId = u64;

struct Subscriber {
    id: SubscriptionId,
    filter: Filter,
    tx: mpsc::UnboundedSender<Event>,
}

#[derive(Default)]
struct Registry {
    next_id: SubscriptionId,
    subscribers: Vec<Subscriber>,
}

/// Shared publish/subscribe hub.
///
/// Cloning is cheap; all clones share one subscriber registry. Delivery is
/// enqueue-only: `publish` never waits on a subscriber, and each subscriber
/// observes events in the order they were published.
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscriber whose filter accepts it.
    ///
    /// Subscribers registered after this call returns never see the event.
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: Event) -> usize {
        let mut registry = self.registry.lock();
        let mut delivered = 0;

        registry.subscribers.retain(|sub| {
            if !sub.filter.accepts(&event) {
                return !sub.tx.is_closed();
            }
            match sub.tx.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(subscription = sub.id, "Dropping closed subscription");
                    false
                }
            }
        });

        trace!(kind = %event.kind, delivered, "Published event");
        delivered
    }

    /// Register a new subscriber. Dropping the returned handle unsubscribes.
    pub fn subscribe(&self, filter: Filter) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.push(Subscriber { id, filter, tx });

        debug!(subscription = id, total = registry.subscribers.len(), "Subscribed");
        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a subscriber. Events already queued for it remain readable.
    /// Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        remove(&self.registry, id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().subscribers.len()
    }
}

fn remove(registry: &Mutex<Registry>, id: SubscriptionId) {
    let mut registry = registry.lock();
    let before = registry.subscribers.len();
    registry.subscribers.retain(|sub| sub.id != id);
    if registry.subscribers.len() != before {
        debug!(subscription = id, "Unsubscribed");
    }
}

/// Receiving half of a bus subscription.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Event>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Wait for the next delivered event. Returns `None` once the
    /// subscription has been removed and its queue drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            remove(&registry, self.id);
        }
    }
}

//! Topic registry and the publish/subscribe protocol.
//!
//! The broker maps each topic name to the subscribers currently listening on
//! it. Publishing fans a message out to every one of them; subscribing returns
//! a [`Subscription`] that is removed from the registry when it is dropped.

pub mod mailbox;
mod subscription;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

pub use mailbox::{Delivery, Mailbox, OverflowPolicy, SinkConfig};
pub use subscription::Subscription;

pub type SubscriberId = Uuid;

/// Registry entry for one live subscription.
#[derive(Clone)]
struct Subscriber {
    id: SubscriberId,
    mailbox: Arc<Mailbox>,
}

struct Inner {
    /// Subscribers per topic, in registration order. A topic with no
    /// subscribers has no entry.
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
    sink: SinkConfig,
}

/// In-process topic broker.
///
/// Cloning is cheap and every clone shares the same registry. Construct one
/// per process and hand clones to whoever needs it.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    pub fn new(sink: SinkConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: RwLock::new(HashMap::new()),
                sink,
            }),
        }
    }

    pub fn sink_config(&self) -> SinkConfig {
        self.inner.sink
    }

    /// Register a new subscriber on `topic`.
    ///
    /// Never blocks. The subscription sees every message published to the
    /// topic from now on and nothing published before.
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let id = Uuid::new_v4();
        let mailbox = Arc::new(Mailbox::new(self.inner.sink));

        self.inner
            .topics
            .write()
            .entry(topic.to_owned())
            .or_default()
            .push(Subscriber {
                id,
                mailbox: mailbox.clone(),
            });

        tracing::debug!(topic, subscriber = %id, "subscribed");
        Subscription::new(id, topic.to_owned(), mailbox, self.clone())
    }

    /// Deliver `message` to every current subscriber of `topic`, in
    /// registration order.
    ///
    /// Returns how many subscribers accepted the message. Under
    /// [`OverflowPolicy::Block`] this waits on each full mailbox in turn.
    pub async fn publish(&self, topic: &str, message: impl Into<String>) -> usize {
        // Snapshot so no lock is held while waiting on a mailbox.
        let subscribers = {
            let topics = self.inner.topics.read();
            match topics.get(topic) {
                Some(subscribers) => subscribers.clone(),
                None => return 0,
            }
        };

        let message = message.into();
        let mut delivered = 0;
        for subscriber in &subscribers {
            match subscriber.mailbox.push(message.clone()).await {
                Delivery::Queued => delivered += 1,
                Delivery::Evicted => {
                    delivered += 1;
                    tracing::debug!(topic, subscriber = %subscriber.id, "mailbox full, evicted oldest message");
                }
                Delivery::Dropped => {
                    tracing::debug!(topic, subscriber = %subscriber.id, "mailbox full, message dropped");
                }
                // Unsubscribed after the snapshot was taken.
                Delivery::Closed => {}
            }
        }
        delivered
    }

    /// Remove `subscription` from its topic and close its mailbox.
    ///
    /// Calling this more than once is a no-op. Dropping the subscription
    /// calls it as well.
    pub fn unsubscribe(&self, subscription: &Subscription) {
        self.remove(subscription.topic(), subscription.id(), subscription.mailbox());
    }

    fn remove(&self, topic: &str, id: SubscriberId, mailbox: &Mailbox) {
        let mut topics = self.inner.topics.write();

        let mut removed = false;
        let mut emptied = false;
        if let Some(subscribers) = topics.get_mut(topic) {
            let before = subscribers.len();
            subscribers.retain(|s| s.id != id);
            removed = subscribers.len() < before;
            emptied = subscribers.is_empty();
        }
        if emptied {
            topics.remove(topic);
        }

        // Closed under the registry lock so removal and termination are one step.
        mailbox.close();
        drop(topics);

        if removed {
            tracing::debug!(topic, subscriber = %id, "unsubscribed");
        }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.read().get(topic).map_or(0, Vec::len)
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.inner.topics.read().len()
    }

    /// Every topic with its subscriber count, sorted by name.
    pub fn topics(&self) -> Vec<(String, usize)> {
        let mut topics: Vec<_> = self
            .inner
            .topics
            .read()
            .iter()
            .map(|(name, subscribers)| (name.clone(), subscribers.len()))
            .collect();
        topics.sort();
        topics
    }

    /// Total live subscribers across all topics.
    pub fn total_subscribers(&self) -> usize {
        self.inner.topics.read().values().map(Vec::len).sum()
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new(SinkConfig::default())
    }
}

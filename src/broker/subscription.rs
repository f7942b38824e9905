use std::fmt;
use std::sync::Arc;

use futures::Stream;

use super::{Broker, Mailbox, SubscriberId};

/// A live registration on one topic.
///
/// Read messages with [`recv`](Self::recv) or turn the handle into a
/// [`Stream`]. Dropping the handle, or the stream built from it, unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    topic: String,
    mailbox: Arc<Mailbox>,
    broker: Broker,
}

impl Subscription {
    pub(super) fn new(id: SubscriberId, topic: String, mailbox: Arc<Mailbox>, broker: Broker) -> Self {
        Self {
            id,
            topic,
            mailbox,
            broker,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub(super) fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }

    /// False once unsubscribed.
    pub fn is_active(&self) -> bool {
        !self.mailbox.is_closed()
    }

    /// Wait for the next message. Returns `None` after unsubscribe.
    pub async fn recv(&mut self) -> Option<String> {
        self.mailbox.recv().await
    }

    pub fn unsubscribe(&self) {
        self.broker.unsubscribe(self);
    }

    /// Lazy, unbounded stream of messages. Ends after unsubscribe; dropping it
    /// unsubscribes.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            let message = subscription.recv().await?;
            Some((message, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(self);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

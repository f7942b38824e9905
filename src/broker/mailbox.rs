//! Per-subscriber message queue.
//!
//! Every subscription owns one `Mailbox`. The broker pushes into it, the
//! subscriber's stream drains it. What happens when the queue is full is
//! decided by the configured [`OverflowPolicy`].

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

pub const DEFAULT_CAPACITY: usize = 64;
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

/// What a publisher does when a subscriber's mailbox is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Wait until the subscriber makes room. A stalled subscriber stalls the
    /// publisher and every subscriber after it on the same topic.
    #[default]
    Block,
    /// Discard the incoming message.
    DropNewest,
    /// Evict the oldest queued message to make room.
    DropOldest,
    /// Wait up to the publish timeout, then discard the incoming message.
    Timeout,
}

/// Capacity and overflow behaviour shared by every mailbox a broker creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkConfig {
    pub capacity: usize,
    pub overflow: OverflowPolicy,
    pub publish_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::default(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}

/// Outcome of a single push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Queued, but the oldest pending message was discarded for it.
    Evicted,
    /// Not queued because the mailbox was full.
    Dropped,
    /// Not queued because the subscriber is gone.
    Closed,
}

pub struct Mailbox {
    state: Mutex<State>,
    /// Signalled when a message is queued or the mailbox closes.
    readable: Notify,
    /// Signalled when room frees up or the mailbox closes.
    writable: Notify,
    capacity: usize,
    overflow: OverflowPolicy,
    publish_timeout: Duration,
}

struct State {
    queue: VecDeque<String>,
    closed: bool,
}

impl Mailbox {
    /// A zero capacity is raised to 1.
    pub fn new(config: SinkConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            state: Mutex::new(State {
                queue: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                closed: false,
            }),
            readable: Notify::new(),
            writable: Notify::new(),
            capacity,
            overflow: config.overflow,
            publish_timeout: config.publish_timeout,
        }
    }

    pub async fn push(&self, message: String) -> Delivery {
        match self.overflow {
            OverflowPolicy::Block => self.push_wait(message).await,
            OverflowPolicy::Timeout => {
                tokio::time::timeout(self.publish_timeout, self.push_wait(message))
                    .await
                    .unwrap_or(Delivery::Dropped)
            }
            OverflowPolicy::DropNewest | OverflowPolicy::DropOldest => self.try_push(message),
        }
    }

    fn try_push(&self, message: String) -> Delivery {
        let mut state = self.state.lock();
        if state.closed {
            return Delivery::Closed;
        }

        let mut delivery = Delivery::Queued;
        if state.queue.len() >= self.capacity {
            if self.overflow != OverflowPolicy::DropOldest {
                return Delivery::Dropped;
            }
            state.queue.pop_front();
            delivery = Delivery::Evicted;
        }
        state.queue.push_back(message);
        drop(state);

        self.readable.notify_one();
        delivery
    }

    async fn push_wait(&self, message: String) -> Delivery {
        loop {
            // Register interest before checking, so a pop between the check
            // and the await still wakes us.
            let writable = self.writable.notified();
            tokio::pin!(writable);
            writable.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Delivery::Closed;
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(message);
                    drop(state);
                    self.readable.notify_one();
                    return Delivery::Queued;
                }
            }

            writable.await;
        }
    }

    /// Next queued message, or `None` once the mailbox is closed.
    pub async fn recv(&self) -> Option<String> {
        loop {
            let readable = self.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(message) = state.queue.pop_front() {
                    drop(state);
                    self.writable.notify_waiters();
                    return Some(message);
                }
            }

            readable.await;
        }
    }

    /// Closes the mailbox and discards anything still queued. Wakes the
    /// reader and any blocked publishers. Returns `false` if it was already
    /// closed.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        state.queue.clear();
        drop(state);

        self.readable.notify_waiters();
        self.writable.notify_waiters();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Live subscription to one topic. Hand it back to [`SignalBus::unsubscribe`]
/// to detach; dropping it only stops delivery locally.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    topic: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    pub fn new(id: SubscriptionId, topic: impl Into<String>, receiver: broadcast::Receiver<BusMessage>) -> Self {
        Self {
            id,
            topic: topic.into(),
            receiver,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Wait for the next message on this topic. Lagged receivers skip ahead
    /// rather than failing.
    pub async fn recv(&mut self) -> BusResult<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Ok(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        target = "signal.bus",
                        topic = %self.topic,
                        skipped,
                        "subscriber lagged; messages dropped"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }
}

/// Topic-based publish/subscribe channel used to carry signaling events.
///
/// Delivery is assumed at-least-once and unordered across publishers;
/// consumers must tolerate duplicates and reordering.
#[async_trait]
pub trait SignalBus: Send + Sync {
    fn subscribe(&self, topic: &str) -> Subscription;
    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()>;
    fn unsubscribe(&self, subscription: Subscription);
}

#[derive(Debug)]
struct TopicEntry {
    sender: broadcast::Sender<BusMessage>,
    subscribers: HashSet<SubscriptionId>,
}

impl TopicEntry {
    fn new() -> Self {
        Self {
            sender: broadcast::channel(TOPIC_CAPACITY).0,
            subscribers: HashSet::new(),
        }
    }
}

/// Simple in-memory bus for tests and single-process demos.
#[derive(Debug, Default)]
pub struct LocalBus {
    topics: RwLock<HashMap<String, TopicEntry>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|entry| entry.subscribers.len())
            .unwrap_or(0)
    }

    /// Total number of payloads accepted by `publish` since creation.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SignalBus for LocalBus {
    fn subscribe(&self, topic: &str) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.topics.write();
        let entry = guard
            .entry(topic.to_string())
            .or_insert_with(TopicEntry::new);
        entry.subscribers.insert(id);
        Subscription::new(id, topic, entry.sender.subscribe())
    }

    async fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        self.published.fetch_add(1, Ordering::Relaxed);
        let sender = {
            let guard = self.topics.read();
            guard.get(topic).map(|entry| entry.sender.clone())
        };
        let Some(sender) = sender else {
            debug!(target = "signal.bus", topic, "publish with no subscribers");
            return Ok(());
        };
        // a send error only means every receiver is gone
        let _ = sender.send(BusMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn unsubscribe(&self, subscription: Subscription) {
        let mut guard = self.topics.write();
        let now_empty = match guard.get_mut(subscription.topic()) {
            Some(entry) => {
                entry.subscribers.remove(&subscription.id());
                entry.subscribers.is_empty()
            }
            None => false,
        };
        if now_empty {
            guard.remove(subscription.topic());
        }
    }
}

//! Multi-topic publish/subscribe channel for live session progress.
//!
//! Each topic fans out to its own set of unbounded senders, so publishing never
//! waits on a slow consumer. Subscribers only see items published after their
//! own `subscribe` call.

use core::hash::Hash;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::Stream;
use tokio::sync::mpsc;
use tracing::debug;

/// Event types published by the engine
pub mod events;

pub use events::{EventBus, SessionEvent, Topic, TopicKey};

/// Per-topic fan-out state.
struct TopicState<T> {
    /// Live subscriber senders
    subscribers: Vec<mpsc::UnboundedSender<T>>,
    /// Total number of publishes on this topic
    published: u64,
}

impl<T> Default for TopicState<T> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
            published: 0,
        }
    }
}

/// Multi-topic publish/subscribe channel.
///
/// Cloning yields another handle to the same topics.
pub struct SubscriptionBus<K, T> {
    /// Topics created so far
    topics: Arc<Mutex<HashMap<K, TopicState<T>>>>,
}

impl<K, T> Clone for SubscriptionBus<K, T> {
    fn clone(&self) -> Self {
        Self {
            topics: Arc::clone(&self.topics),
        }
    }
}

impl<K, T> Default for SubscriptionBus<K, T> {
    fn default() -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, T> SubscriptionBus<K, T>
where
    K: Eq + Hash + Clone + Debug,
    T: Clone,
{
    /// Creates a bus with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<K, TopicState<T>>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes `payload` on `topic`, returning how many subscribers received it.
    ///
    /// Never blocks. Subscribers whose stream was dropped are pruned.
    pub fn publish(&self, topic: &K, payload: T) -> usize {
        let mut topics = self.topics();
        let state = topics.entry(topic.clone()).or_insert_with(|| {
            debug!(topic = ?topic, "Creating bus topic on publish");
            TopicState::default()
        });
        state.published += 1;
        state
            .subscribers
            .retain(|sender| sender.send(payload.clone()).is_ok());
        state.subscribers.len()
    }

    /// Subscribes to `topic`, receiving every item published from now on.
    pub fn subscribe(&self, topic: &K) -> Subscription<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut topics = self.topics();
        topics
            .entry(topic.clone())
            .or_insert_with(|| {
                debug!(topic = ?topic, "Creating bus topic on subscribe");
                TopicState::default()
            })
            .subscribers
            .push(sender);
        Subscription { receiver }
    }

    /// Number of live subscribers on `topic`.
    pub fn subscriber_count(&self, topic: &K) -> usize {
        self.topics().get_mut(topic).map_or(0, |state| {
            state.subscribers.retain(|sender| !sender.is_closed());
            state.subscribers.len()
        })
    }

    /// Number of items ever published on `topic`.
    pub fn published_count(&self, topic: &K) -> u64 {
        self.topics().get(topic).map_or(0, |state| state.published)
    }

    /// Whether `topic` has been created.
    pub fn has_topic(&self, topic: &K) -> bool {
        self.topics().contains_key(topic)
    }

    /// Drops every subscriber sender so all open subscriptions end.
    pub fn close(&self) {
        let mut topics = self.topics();
        for state in topics.values_mut() {
            state.subscribers.clear();
        }
    }
}

/// One consumer's ordered view of a topic.
///
/// Ends once the bus is closed (or every bus handle is dropped) and all
/// buffered items have been read.
pub struct Subscription<T> {
    /// Receiving half of this subscriber's buffer
    receiver: mpsc::UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Waits for the next item, or `None` once the topic has been closed.
    pub async fn next_event(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    /// Returns an already buffered item without waiting.
    pub fn try_next(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, context: &mut Context<'_>) -> Poll<Option<T>> {
        self.get_mut().receiver.poll_recv(context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    #[tokio::test]
    async fn test_fifo_within_topic() {
        let bus: SubscriptionBus<&str, u32> = SubscriptionBus::new();
        let subscription = bus.subscribe(&"numbers");
        for value in 0..5 {
            bus.publish(&"numbers", value);
        }
        bus.close();

        let received: Vec<u32> = subscription.collect().await;
        assert_eq!(received, [0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_item() {
        let bus: SubscriptionBus<&str, &str> = SubscriptionBus::new();
        let mut first = bus.subscribe(&"topic");
        let mut second = bus.subscribe(&"topic");
        assert_eq!(bus.publish(&"topic", "hello"), 2);

        assert_eq!(first.next_event().await, Some("hello"));
        assert_eq!(second.next_event().await, Some("hello"));
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let bus: SubscriptionBus<&str, &str> = SubscriptionBus::new();
        let mut left = bus.subscribe(&"left");
        bus.publish(&"right", "ignored");
        bus.publish(&"left", "seen");

        assert_eq!(left.next_event().await, Some("seen"));
        assert_eq!(left.try_next(), None);
        assert_eq!(bus.published_count(&"right"), 1);
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let bus: SubscriptionBus<&str, u8> = SubscriptionBus::new();
        let subscription = bus.subscribe(&"topic");
        assert_eq!(bus.subscriber_count(&"topic"), 1);
        drop(subscription);
        assert_eq!(bus.publish(&"topic", 1), 0);
        assert_eq!(bus.subscriber_count(&"topic"), 0);
    }

    #[test]
    fn test_publish_without_subscriber_creates_topic() {
        let bus: SubscriptionBus<&str, u8> = SubscriptionBus::new();
        assert!(!bus.has_topic(&"lazy"));
        assert_eq!(bus.publish(&"lazy", 1), 0);
        assert!(bus.has_topic(&"lazy"));
        assert_eq!(bus.published_count(&"lazy"), 1);
    }
}

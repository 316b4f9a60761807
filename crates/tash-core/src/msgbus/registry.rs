//! Topic and subscription registry.
//!
//! Maps each topic to its live subscribers. Topics exist only while they have
//! at least one subscriber. All mutation happens under one coarse lock, and
//! publishers only ever take a point-in-time snapshot out of it.

use super::topic::{MessageHandler, SubscriptionKey, Topic};
use crate::error::SubscriptionError;
use parking_lot::Mutex;
use std::collections::HashMap;

/// A registration of a handler under a topic
struct Subscription<T> {
    key: SubscriptionKey,
    handler: MessageHandler<T>,
}

struct RegistryInner<T> {
    topics: HashMap<Topic, Vec<Subscription<T>>>,
    next_seq: u64,
    closed: bool,
}

/// Thread-safe topic to subscribers map
pub struct SubscriberRegistry<T> {
    inner: Mutex<RegistryInner<T>>,
}

impl<T> SubscriberRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_sequence_start(0)
    }

    pub(crate) fn with_sequence_start(next_seq: u64) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                topics: HashMap::new(),
                next_seq,
                closed: false,
            }),
        }
    }

    /// Register `handler` under `topic`, creating the topic if needed
    pub fn insert(
        &self,
        topic: Topic,
        handler: MessageHandler<T>,
    ) -> Result<SubscriptionKey, SubscriptionError> {
        if handler.is_closed() {
            return Err(SubscriptionError::InvalidHandler);
        }

        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(SubscriptionError::Closed);
        }

        let seq = inner.next_seq;
        inner.next_seq = seq.checked_add(1).ok_or_else(|| {
            SubscriptionError::KeyGeneration("subscription key sequence exhausted".to_string())
        })?;

        let key = SubscriptionKey::new(seq);
        inner
            .topics
            .entry(topic)
            .or_default()
            .push(Subscription { key, handler });
        Ok(key)
    }

    /// Remove a subscription, dropping the topic with its last subscriber
    ///
    /// Returns true if the subscription was found and removed.
    pub fn remove(&self, topic: &Topic, key: SubscriptionKey) -> bool {
        let mut inner = self.inner.lock();
        let Some(subscriptions) = inner.topics.get_mut(topic) else {
            return false;
        };
        let Some(index) = subscriptions.iter().position(|s| s.key == key) else {
            return false;
        };

        subscriptions.remove(index);
        let remaining = subscriptions.len();
        if remaining == 0 {
            inner.topics.remove(topic);
            tracing::debug!("removed topic {}, no more subscribers", topic);
        } else {
            tracing::debug!("removed {} from {}, {} subscribers remaining", key, topic, remaining);
        }
        true
    }

    /// Point-in-time copy of the subscribers of `topic`
    pub fn snapshot(&self, topic: &Topic) -> Vec<(SubscriptionKey, MessageHandler<T>)> {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map(|subs| {
                subs.iter()
                    .map(|s| (s.key, s.handler.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Topics that currently have subscribers
    pub fn topics(&self) -> Vec<Topic> {
        let mut topics: Vec<Topic> = self.inner.lock().topics.keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Check if `topic` currently has subscribers
    pub fn contains(&self, topic: &Topic) -> bool {
        self.inner.lock().topics.contains_key(topic)
    }

    /// Number of subscribers of `topic`
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.inner
            .lock()
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Stop accepting new subscriptions
    pub fn close(&self) {
        self.inner.lock().closed = true;
    }

    /// Check if the registry has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl<T> Default for SubscriberRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

//! Message bus implementation.
//!
//! Fans each published envelope out to every current subscriber of its topic.
//! Every delivery runs on its own task and must complete within the delivery
//! timeout of its publish, so a stalled consumer never blocks the publisher or
//! the other consumers.
//!
//! Deliveries to one handler are queued: a delivery starts sending only after
//! the previous delivery to that handler (on any topic) has finished. A
//! consumer therefore sees envelopes in the order they were published.

use super::registry::SubscriberRegistry;
use super::topic::{MessageHandler, QueueSlot, SubscriptionKey, Topic, TopicMessage};
use crate::error::SubscriptionError;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Configuration for the message bus
#[derive(Debug, Clone)]
pub struct MessageBusConfig {
    /// How long after its publish a delivery may still wait on its handler.
    pub delivery_timeout: Duration,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(5),
        }
    }
}

/// Outcome of one delivery to one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// The handler accepted the envelope
    Delivered,
    /// The handler stayed full for the whole timeout window
    TimedOut,
    /// The handler's receiving side is gone
    Closed,
}

/// Tally of a settled publish
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Deliveries accepted by their handler.
    pub delivered: usize,
    /// Deliveries abandoned after the timeout.
    pub timed_out: usize,
    /// Deliveries to handlers that were closed.
    pub closed: usize,
}

impl DeliveryReport {
    fn record(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Delivered => self.delivered += 1,
            DeliveryStatus::TimedOut => self.timed_out += 1,
            DeliveryStatus::Closed => self.closed += 1,
        }
    }

    /// Total number of subscribers the publish was routed to
    pub fn total(&self) -> usize {
        self.delivered + self.timed_out + self.closed
    }
}

/// Receipt for a publish
///
/// Dropping it leaves the deliveries running in the background. Awaiting
/// [`Delivery::settled`] waits until every delivery has been accepted, timed
/// out or found its handler closed.
#[derive(Debug, Default)]
pub struct Delivery {
    pending: Vec<JoinHandle<DeliveryStatus>>,
    report: DeliveryReport,
}

impl Delivery {
    /// A receipt for a publish that reached nobody
    pub fn empty() -> Self {
        Self::default()
    }

    fn pending(pending: Vec<JoinHandle<DeliveryStatus>>) -> Self {
        Self {
            pending,
            report: DeliveryReport::default(),
        }
    }

    fn settled_now(report: DeliveryReport) -> Self {
        Self {
            pending: Vec::new(),
            report,
        }
    }

    /// Number of subscribers this publish was routed to
    pub fn subscriber_count(&self) -> usize {
        self.pending.len() + self.report.total()
    }

    /// Wait for every delivery to finish
    pub async fn settled(self) -> DeliveryReport {
        let mut report = self.report;
        for handle in self.pending {
            match handle.await {
                Ok(status) => report.record(status),
                Err(e) => {
                    tracing::warn!("delivery task did not complete: {}", e);
                    report.record(DeliveryStatus::Closed);
                }
            }
        }
        report
    }
}

/// Publishes envelopes to a topic
pub trait Publisher<T>: Send + Sync {
    /// Deliver `msg` to every current subscriber of its topic
    fn publish(&self, msg: TopicMessage<T>) -> Delivery;
}

/// Registers handlers under topics
pub trait Subscriber<T>: Send + Sync {
    /// Register `handler` under `topic`
    fn subscribe(
        &self,
        topic: Topic,
        handler: MessageHandler<T>,
    ) -> Result<SubscriptionKey, SubscriptionError>;
}

/// Removes subscriptions
pub trait Unsubscriber: Send + Sync {
    /// Remove the subscription `key` from `topic`
    fn unsubscribe(&self, topic: &Topic, key: SubscriptionKey);
}

/// Publishing, subscribing and unsubscribing combined
pub trait PublisherSubscriber<T>: Publisher<T> + Subscriber<T> + Unsubscriber {}

impl<T, B> PublisherSubscriber<T> for B where B: Publisher<T> + Subscriber<T> + Unsubscriber {}

/// Topic-scoped publish/subscribe bus
///
/// Cloning is cheap and every clone shares the same registry.
pub struct MessageBus<T> {
    registry: Arc<SubscriberRegistry<T>>,
    config: MessageBusConfig,
}

impl<T> Clone for MessageBus<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            config: self.config.clone(),
        }
    }
}

impl<T> MessageBus<T>
where
    T: Clone + Send + 'static,
{
    /// Create a new message bus with default configuration
    pub fn new() -> Self {
        Self::with_config(MessageBusConfig::default())
    }

    /// Create a new message bus with custom configuration
    pub fn with_config(config: MessageBusConfig) -> Self {
        Self {
            registry: Arc::new(SubscriberRegistry::new()),
            config,
        }
    }

    /// Register `handler` under `topic`
    ///
    /// Fails with [`SubscriptionError::InvalidHandler`] if the handler's
    /// receiver has been dropped.
    pub fn subscribe(
        &self,
        topic: impl Into<Topic>,
        handler: MessageHandler<T>,
    ) -> Result<SubscriptionKey, SubscriptionError> {
        let topic = topic.into();
        let key = self.registry.insert(topic.clone(), handler)?;
        tracing::debug!("Subscription {} added to {}", key, topic);
        Ok(key)
    }

    /// Remove a subscription; unknown topics or keys are ignored
    pub fn unsubscribe(&self, topic: &Topic, key: SubscriptionKey) {
        self.registry.remove(topic, key);
    }

    /// Publish an envelope to all subscribers of its topic
    ///
    /// Never blocks on a consumer. Publishing to a topic without subscribers
    /// is a silent no-op. Each handler receives envelopes in publish order.
    /// Outside a tokio runtime each delivery degrades to a single non-blocking
    /// attempt.
    pub fn publish(&self, msg: TopicMessage<T>) -> Delivery {
        let subscribers = self.registry.snapshot(&msg.topic);
        if subscribers.is_empty() {
            return Delivery::empty();
        }

        match Handle::try_current() {
            Ok(runtime) => {
                let deadline = Instant::now() + self.config.delivery_timeout;
                let pending = subscribers
                    .into_iter()
                    .map(|(key, handler)| {
                        let slot = handler.reserve();
                        runtime.spawn(deliver(key, handler, msg.clone(), slot, deadline))
                    })
                    .collect();
                Delivery::pending(pending)
            }
            Err(_) => {
                let mut report = DeliveryReport::default();
                for (key, handler) in subscribers {
                    report.record(try_deliver(key, &handler, msg.clone()));
                }
                Delivery::settled_now(report)
            }
        }
    }

    /// Stop accepting new subscriptions; existing ones keep receiving
    pub fn close(&self) {
        self.registry.close();
    }

    /// Check if the bus has been closed
    pub fn is_closed(&self) -> bool {
        self.registry.is_closed()
    }

    /// Topics that currently have subscribers
    pub fn topics(&self) -> Vec<Topic> {
        self.registry.topics()
    }

    /// Check if `topic` currently has subscribers
    pub fn has_topic(&self, topic: &Topic) -> bool {
        self.registry.contains(topic)
    }

    /// Number of subscribers of `topic`
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.registry.subscriber_count(topic)
    }

    /// Get the current configuration
    pub fn config(&self) -> &MessageBusConfig {
        &self.config
    }
}

impl<T> Default for MessageBus<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for MessageBus<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("topics", &self.registry.topics())
            .field("config", &self.config)
            .finish()
    }
}

impl<T> Publisher<T> for MessageBus<T>
where
    T: Clone + Send + 'static,
{
    fn publish(&self, msg: TopicMessage<T>) -> Delivery {
        MessageBus::publish(self, msg)
    }
}

impl<T> Subscriber<T> for MessageBus<T>
where
    T: Clone + Send + 'static,
{
    fn subscribe(
        &self,
        topic: Topic,
        handler: MessageHandler<T>,
    ) -> Result<SubscriptionKey, SubscriptionError> {
        MessageBus::subscribe(self, topic, handler)
    }
}

impl<T> Unsubscriber for MessageBus<T>
where
    T: Clone + Send + 'static,
{
    fn unsubscribe(&self, topic: &Topic, key: SubscriptionKey) {
        MessageBus::unsubscribe(self, topic, key)
    }
}

async fn deliver<T>(
    key: SubscriptionKey,
    handler: MessageHandler<T>,
    msg: TopicMessage<T>,
    slot: QueueSlot,
    deadline: Instant,
) -> DeliveryStatus {
    let QueueSlot { previous, done: _done } = slot;
    let topic = msg.topic.clone();
    let send = async {
        if let Some(previous) = previous {
            // An error only means the previous delivery was dropped
            let _ = previous.await;
        }
        handler.send(msg).await
    };

    match tokio::time::timeout_at(deadline, send).await {
        Ok(Ok(())) => {
            tracing::trace!("published msg to {} for {}", topic, key);
            DeliveryStatus::Delivered
        }
        Ok(Err(_)) => {
            tracing::warn!("handler for {} on {} is closed", key, topic);
            DeliveryStatus::Closed
        }
        Err(_) => {
            tracing::warn!(
                "delivery to {} on {} abandoned at its deadline",
                key,
                topic
            );
            DeliveryStatus::TimedOut
        }
    }
}

fn try_deliver<T>(key: SubscriptionKey, handler: &MessageHandler<T>, msg: TopicMessage<T>) -> DeliveryStatus {
    let topic = msg.topic.clone();
    match handler.try_send(msg) {
        Ok(()) => DeliveryStatus::Delivered,
        Err(TrySendError::Full(_)) => {
            tracing::warn!("handler for {} on {} is full, message dropped", key, topic);
            DeliveryStatus::TimedOut
        }
        Err(TrySendError::Closed(_)) => DeliveryStatus::Closed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msgbus::topic::message_handler;

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = MessageBus::<String>::new();
        let topic = Topic::from("test-topic");
        let (handler, mut rx) = message_handler(10);

        bus.subscribe(topic.clone(), handler).unwrap();
        let report = bus
            .publish(TopicMessage::new(topic.clone(), "test message".to_string()))
            .settled()
            .await;
        assert_eq!(report.delivered, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, topic);
        assert_eq!(received.message, "test message");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = MessageBus::<u32>::new();
        let delivery = bus.publish(TopicMessage::new("nonexistent-topic", 1));
        assert_eq!(delivery.subscriber_count(), 0);
        assert_eq!(delivery.settled().await, DeliveryReport::default());
        assert!(bus.topics().is_empty());
    }

    #[test]
    fn test_publish_outside_runtime() {
        let bus = MessageBus::<u32>::new();
        let (handler, mut rx) = message_handler(1);
        bus.subscribe("t", handler).unwrap();

        let first = bus.publish(TopicMessage::new("t", 1));
        assert_eq!(first.subscriber_count(), 1);
        // Capacity is one, so the second envelope is dropped rather than blocking.
        bus.publish(TopicMessage::new("t", 2));

        assert_eq!(rx.try_recv().unwrap().message, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_consumer_does_not_block_others() {
        let bus = MessageBus::<u32>::with_config(MessageBusConfig {
            delivery_timeout: Duration::from_millis(100),
        });
        let (slow, _slow_rx) = message_handler(1);
        let (fast, mut fast_rx) = message_handler(10);
        bus.subscribe("t", slow).unwrap();
        bus.subscribe("t", fast).unwrap();

        // Fill the slow handler so the next delivery to it has to wait.
        bus.publish(TopicMessage::new("t", 0)).settled().await;

        let report = bus.publish(TopicMessage::new("t", 1)).settled().await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.timed_out, 1);

        assert_eq!(fast_rx.recv().await.unwrap().message, 0);
        assert_eq!(fast_rx.recv().await.unwrap().message, 1);
    }

    #[tokio::test]
    async fn test_stalled_consumer_does_not_delay_fire_and_forget() {
        let bus = MessageBus::<u32>::with_config(MessageBusConfig {
            delivery_timeout: Duration::from_secs(5),
        });
        let (stalled, _stalled_rx) = message_handler(1);
        let (healthy, mut healthy_rx) = message_handler(64);
        bus.subscribe("t", stalled).unwrap();
        bus.subscribe("t", healthy).unwrap();

        let started = std::time::Instant::now();
        for i in 0..20 {
            bus.publish(TopicMessage::new("t", i));
        }
        for i in 0..20 {
            assert_eq!(healthy_rx.recv().await.unwrap().message, i);
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_handler_order_spans_topics() {
        let bus = MessageBus::<u32>::new();
        let (handler, mut rx) = message_handler(2);
        bus.subscribe("a", handler.clone()).unwrap();
        bus.subscribe("b", handler).unwrap();

        for i in 0..50 {
            let topic = if i % 3 == 0 { "a" } else { "b" };
            bus.publish(TopicMessage::new(topic, i));
        }
        for i in 0..50 {
            assert_eq!(rx.recv().await.unwrap().message, i);
        }
    }

    #[tokio::test]
    async fn test_backlog_expires_at_publish_deadline() {
        let bus = MessageBus::<u32>::with_config(MessageBusConfig {
            delivery_timeout: Duration::from_millis(100),
        });
        let (handler, _rx) = message_handler(1);
        bus.subscribe("t", handler).unwrap();

        let deliveries: Vec<_> = (0..5).map(|i| bus.publish(TopicMessage::new("t", i))).collect();
        let started = std::time::Instant::now();
        let mut timed_out = 0;
        for delivery in deliveries {
            timed_out += delivery.settled().await.timed_out;
        }
        assert_eq!(timed_out, 4);
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_closed_handler_is_reported() {
        let bus = MessageBus::<u32>::new();
        let (handler, rx) = message_handler(1);
        bus.subscribe("t", handler).unwrap();
        drop(rx);

        let report = bus.publish(TopicMessage::new("t", 1)).settled().await;
        assert_eq!(report.closed, 1);
    }

    #[tokio::test]
    async fn test_clones_share_registry() {
        let bus = MessageBus::<u32>::new();
        let other = bus.clone();
        let (handler, mut rx) = message_handler(1);
        other.subscribe("t", handler).unwrap();

        bus.publish(TopicMessage::new("t", 9)).settled().await;
        assert_eq!(rx.recv().await.unwrap().message, 9);
        assert!(bus.has_topic(&Topic::from("t")));
    }
}

//! Topics, envelopes, subscriber keys and handlers.

use parking_lot::Mutex;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Named logical channel of events
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(Cow<'static, str>);

impl Topic {
    /// Create a topic from a static name without allocating
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    /// Topic name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Topic {
    fn from(name: &'static str) -> Self {
        Self::from_static(name)
    }
}

impl From<String> for Topic {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message linked to a specific topic
///
/// The bus never inspects `message`; it only routes on `topic`.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMessage<T> {
    /// Channel the message is published on.
    pub topic: Topic,
    /// Caller-defined payload.
    pub message: T,
}

impl<T> TopicMessage<T> {
    /// Create a new envelope
    pub fn new(topic: impl Into<Topic>, message: T) -> Self {
        Self {
            topic: topic.into(),
            message,
        }
    }
}

/// Key identifying one subscription for later removal
///
/// The sequence part is unique for the lifetime of the bus that minted it,
/// so a key is never handed out twice even after its subscription is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    seq: u64,
    id: Uuid,
}

impl SubscriptionKey {
    pub(crate) fn new(seq: u64) -> Self {
        Self {
            seq,
            id: Uuid::new_v4(),
        }
    }

    /// Bus-local sequence number
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Random identifier, unique across buses
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({}/{})", self.seq, &self.id.to_string()[..8])
    }
}

/// Sink receiving envelopes for a subscription
///
/// A bounded channel sender. One handler may be subscribed to several topics;
/// the receiving side sees every envelope in a single queue, in publish
/// order. Clones share that order.
#[derive(Debug)]
pub struct MessageHandler<T> {
    tx: mpsc::Sender<TopicMessage<T>>,
    /// Completion signal of the most recently queued delivery.
    tail: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
}

/// Place of one delivery in a handler's queue
pub(crate) struct QueueSlot {
    /// Resolves once the previous delivery has finished.
    pub(crate) previous: Option<oneshot::Receiver<()>>,
    /// Dropped once this delivery has finished.
    pub(crate) done: oneshot::Sender<()>,
}

impl<T> Clone for MessageHandler<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            tail: Arc::clone(&self.tail),
        }
    }
}

impl<T> From<mpsc::Sender<TopicMessage<T>>> for MessageHandler<T> {
    fn from(tx: mpsc::Sender<TopicMessage<T>>) -> Self {
        Self {
            tx,
            tail: Arc::default(),
        }
    }
}

impl<T> MessageHandler<T> {
    /// Check if the receiving side has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Take the next place in this handler's delivery queue
    pub(crate) fn reserve(&self) -> QueueSlot {
        let (done, next) = oneshot::channel();
        let previous = self.tail.lock().replace(next);
        QueueSlot { previous, done }
    }

    pub(crate) async fn send(
        &self,
        msg: TopicMessage<T>,
    ) -> Result<(), mpsc::error::SendError<TopicMessage<T>>> {
        self.tx.send(msg).await
    }

    pub(crate) fn try_send(
        &self,
        msg: TopicMessage<T>,
    ) -> Result<(), mpsc::error::TrySendError<TopicMessage<T>>> {
        self.tx.try_send(msg)
    }
}

/// Create a handler and the receiver that drains it
///
/// A capacity of zero is raised to one.
pub fn message_handler<T>(capacity: usize) -> (MessageHandler<T>, mpsc::Receiver<TopicMessage<T>>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (MessageHandler::from(tx), rx)
}

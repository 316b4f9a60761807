//! # Tash Core
//!
//! Core types for Tash.
//! Provides the topic-scoped message bus, the error taxonomy and the
//! task event model shared by the executor and its consumers.

pub mod error;
pub mod event;
pub mod msgbus;

pub use error::{Error, ProcessError, Result, SubscriptionError};

pub use event::{
    CancelHandle, CommandState, OutputLine, ProcessSnapshot, TaskFailure, TaskMessage, TaskTopic,
};

// Re-export message bus for convenience
pub use msgbus::{
    message_handler, Delivery, DeliveryReport, DeliveryStatus, MessageBus, MessageBusConfig,
    MessageHandler, Publisher, PublisherSubscriber, SubscriberRegistry, Subscriber,
    SubscriptionKey, Topic, TopicMessage, Unsubscriber,
};

/// Bus carrying task events
pub type TaskBus = MessageBus<TaskMessage>;

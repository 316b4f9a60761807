//! # Message Bus Module
//!
//! Topic-scoped publish/subscribe bus that decouples producers of task events
//! from their consumers.
//!
//! ## Overview
//!
//! - Topics are created by their first subscription and removed with their last
//! - Each published envelope is delivered to every subscriber concurrently,
//!   each delivery bounded by [`MessageBusConfig::delivery_timeout`]
//! - Publishing never blocks on a consumer and never fails
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tash_core::msgbus::{message_handler, MessageBus, TopicMessage};
//!
//! let bus = MessageBus::<String>::new();
//! let (handler, mut rx) = message_handler(16);
//! let key = bus.subscribe("task.output", handler)?;
//!
//! bus.publish(TopicMessage::new("task.output", "hello".to_string()));
//! let msg = rx.recv().await;
//!
//! bus.unsubscribe(&"task.output".into(), key);
//! ```

mod bus;
mod registry;
mod topic;

pub use bus::*;
pub use registry::SubscriberRegistry;
pub use topic::*;

//! # Task Events
//!
//! The closed set of events the executor emits and the topics they travel on.
//! Consumers subscribe to [`TaskTopic`]s and match on [`TaskMessage`].

mod message;
mod topic;

pub use message::*;
pub use topic::TaskTopic;

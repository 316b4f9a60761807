//! Closed set of topics the task executor publishes on.

use crate::msgbus::Topic;

/// Task event topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskTopic {
    /// A line of standard output from the running task
    Output,
    /// A line of standard error from the running task
    OutputErr,
    /// A terminal failure
    Error,
    /// Process handle and running-flag snapshot
    Command,
    /// Successful completion
    Done,
    /// Task list refresh succeeded
    ListDone,
    /// Task list refresh failed
    ListError,
}

impl TaskTopic {
    /// Every task topic, for consumers that want the whole event surface
    pub const ALL: [TaskTopic; 7] = [
        TaskTopic::Output,
        TaskTopic::OutputErr,
        TaskTopic::Error,
        TaskTopic::Command,
        TaskTopic::Done,
        TaskTopic::ListDone,
        TaskTopic::ListError,
    ];

    /// Wire name of the topic
    pub const fn name(self) -> &'static str {
        match self {
            Self::Output => "task.output",
            Self::OutputErr => "task.outputerr",
            Self::Error => "task.error",
            Self::Command => "task.command",
            Self::Done => "task.done",
            Self::ListDone => "list.done",
            Self::ListError => "list.error",
        }
    }

    /// Bus topic for this kind of event
    pub const fn topic(self) -> Topic {
        Topic::from_static(self.name())
    }

    /// Look up a task topic by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl From<TaskTopic> for Topic {
    fn from(topic: TaskTopic) -> Self {
        topic.topic()
    }
}

impl std::fmt::Display for TaskTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

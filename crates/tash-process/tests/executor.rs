//! Tests for the task executor
#![cfg(unix)]

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tash_core::{
    message_handler, MessageBusConfig, ProcessError, TaskBus, TaskMessage, TaskTopic,
    TopicMessage,
};
use tash_process::process::PosixProcessGroup;
use tash_process::{
    ExecutorConfig, ExecutorError, ExecutorState, ProcessGroup, TaskExecutor, CANCEL_REQUESTED,
    CANCEL_SENT,
};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::Receiver;

type Events = Receiver<TopicMessage<TaskMessage>>;

fn subscribed_bus() -> (TaskBus, Events) {
    let bus = TaskBus::new();
    let (handler, rx) = message_handler(256);
    for topic in TaskTopic::ALL {
        bus.subscribe(topic, handler.clone()).unwrap();
    }
    (bus, rx)
}

fn shell_executor(bus: &TaskBus, script: &str) -> TaskExecutor {
    TaskExecutor::new(
        bus.clone(),
        ExecutorConfig {
            program: "sh".to_string(),
            base_args: vec!["-c".to_string(), script.to_string()],
            ..Default::default()
        },
    )
}

async fn next_event(rx: &mut Events) -> TaskMessage {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("event within timeout")
        .expect("bus alive")
        .message
}

async fn collect_until_terminal(rx: &mut Events) -> Vec<TaskMessage> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            return events;
        }
    }
}

fn output_lines(events: &[TaskMessage]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            TaskMessage::Output(line) if line.pid.is_some() => Some(line.text.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_three_lines_then_done() {
    let (bus, mut rx) = subscribed_bus();
    let executor = shell_executor(&bus, "echo one; echo two; echo three");

    let state = executor.execute("build").await.unwrap();
    assert_eq!(state, ExecutorState::Completed);

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(output_lines(&events), vec!["one", "two", "three"]);
    assert!(matches!(events.last(), Some(TaskMessage::Done { task }) if task == "build"));
    assert!(!events.iter().any(|e| matches!(e, TaskMessage::Error(_))));
}

#[tokio::test]
async fn test_command_state_lifecycle() {
    let (bus, mut rx) = subscribed_bus();
    let executor = shell_executor(&bus, "echo hi");

    executor.execute("build").await.unwrap();
    let events = collect_until_terminal(&mut rx).await;

    let commands: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TaskMessage::Command(state) => Some(state.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(commands.len(), 2);

    let started = &commands[0];
    assert!(started.running);
    let snapshot = started.process.as_ref().unwrap();
    assert_eq!(snapshot.task, "build");
    assert_eq!(snapshot.program, "sh");
    assert!(started.cancel.is_some());

    let cleared = &commands[1];
    assert!(!cleared.running);
    assert!(cleared.process.is_none());

    // The cleared state comes right before the terminal event
    let n = events.len();
    assert!(matches!(&events[n - 2], TaskMessage::Command(s) if s.process.is_none()));
}

#[tokio::test]
async fn test_non_zero_exit_reports_code() {
    let (bus, mut rx) = subscribed_bus();
    let executor = shell_executor(&bus, "echo failing >&2; exit 2");

    let state = executor.execute("build").await.unwrap();
    assert_eq!(state, ExecutorState::Failed);

    let events = collect_until_terminal(&mut rx).await;
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            TaskMessage::Error(failure) => Some(failure.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].error, ProcessError::Exit { code: 2 });
    assert!(errors[0].to_string().contains('2'));
    assert!(!events.iter().any(|e| matches!(e, TaskMessage::Done { .. })));

    assert!(events.iter().any(
        |e| matches!(e, TaskMessage::ErrorOutput(line) if line.text == "failing" && line.pid.is_some())
    ));
}

#[tokio::test]
async fn test_spawn_failure_reports_once() {
    let (bus, mut rx) = subscribed_bus();
    let executor = TaskExecutor::new(
        bus.clone(),
        ExecutorConfig {
            program: "tash-definitely-not-an-executable".to_string(),
            ..Default::default()
        },
    );

    let state = executor.execute("build").await.unwrap();
    assert_eq!(state, ExecutorState::Idle);

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], TaskMessage::Command(s) if !s.running && s.process.is_none()));
    match &events[1] {
        TaskMessage::Error(failure) => assert!(failure.error.is_spawn_failure()),
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_running_task() {
    let (bus, mut rx) = subscribed_bus();
    let executor = shell_executor(&bus, "echo started; sleep 30");

    let handle = executor.start("long").unwrap();

    // Wait until the process is producing output
    let mut events = Vec::new();
    loop {
        let event = next_event(&mut rx).await;
        let started = matches!(&event, TaskMessage::Output(line) if line.text == "started");
        events.push(event);
        if started {
            break;
        }
    }

    assert!(executor.cancel());
    events.extend(collect_until_terminal(&mut rx).await);

    let requested = events
        .iter()
        .position(|e| matches!(e, TaskMessage::ErrorOutput(l) if l.text == CANCEL_REQUESTED && l.pid.is_none()))
        .expect("cancellation requested event");
    let sent = events
        .iter()
        .position(|e| matches!(e, TaskMessage::Output(l) if l.text == CANCEL_SENT))
        .expect("cancelled event");
    let terminal = events.len() - 1;
    assert!(requested < sent);
    assert!(sent < terminal);

    match &events[terminal] {
        TaskMessage::Error(failure) => {
            assert!(failure.cancelled);
            assert!(failure.to_string().contains("cancelled"));
        }
        other => panic!("unexpected terminal event {other:?}"),
    }

    assert_eq!(handle.await.unwrap(), ExecutorState::Cancelled);
    assert_eq!(executor.state(), ExecutorState::Cancelled);

    // Nothing observed after the terminal event carries a live handle
    while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        if let TaskMessage::Command(state) = msg.message {
            assert!(state.process.is_none());
        }
    }

    // Cancelling an exited execution is a no-op
    assert!(!executor.cancel());
}

#[tokio::test]
async fn test_cancel_through_published_handle() {
    let (bus, mut rx) = subscribed_bus();
    let executor = shell_executor(&bus, "sleep 30");

    executor.start("long").unwrap();
    let cancel = loop {
        if let TaskMessage::Command(state) = next_event(&mut rx).await {
            if let Some(cancel) = state.cancel {
                break cancel;
            }
        }
    };

    cancel.cancel();
    cancel.cancel();
    let events = collect_until_terminal(&mut rx).await;
    let requested = events
        .iter()
        .filter(|e| matches!(e, TaskMessage::ErrorOutput(l) if l.text == CANCEL_REQUESTED))
        .count();
    assert_eq!(requested, 1);
    assert!(matches!(events.last(), Some(TaskMessage::Error(f)) if f.cancelled));
}

#[tokio::test]
async fn test_only_one_execution_at_a_time() {
    let (bus, mut rx) = subscribed_bus();
    let executor = shell_executor(&bus, "sleep 30");

    executor.start("first").unwrap();
    assert_eq!(
        executor.start("second").unwrap_err(),
        ExecutorError::AlreadyRunning("first".to_string())
    );
    assert_eq!(executor.current_task().as_deref(), Some("first"));

    executor.cancel();
    collect_until_terminal(&mut rx).await;
    assert!(!executor.is_running());
}

#[tokio::test]
async fn test_batch_from_done_handler() {
    let (bus, mut rx) = subscribed_bus();
    let executor = shell_executor(&bus, "echo \"$0\"");
    let mut queue = vec!["lint", "build", "test"].into_iter();

    executor.start(queue.next().unwrap()).unwrap();
    let mut seen = Vec::new();
    loop {
        match next_event(&mut rx).await {
            TaskMessage::Output(line) => seen.push(line.text),
            TaskMessage::Done { .. } => match queue.next() {
                Some(task) => {
                    executor.start(task).unwrap();
                }
                None => break,
            },
            TaskMessage::Error(failure) => panic!("unexpected failure {failure}"),
            _ => {}
        }
    }

    assert_eq!(seen, vec!["lint", "build", "test"]);
    assert_eq!(executor.state(), ExecutorState::Completed);
}

#[tokio::test]
async fn test_stdout_order_is_preserved_under_volume() {
    let (bus, mut rx) = subscribed_bus();
    let executor = shell_executor(&bus, "i=0; while [ $i -lt 200 ]; do echo $i; i=$((i+1)); done");

    executor.execute("count").await.unwrap();
    let events = collect_until_terminal(&mut rx).await;

    let expected: Vec<String> = (0..200).map(|i| i.to_string()).collect();
    assert_eq!(output_lines(&events), expected);
}

#[tokio::test]
async fn test_stalled_consumer_does_not_slow_the_others() {
    let bus = TaskBus::with_config(MessageBusConfig {
        delivery_timeout: Duration::from_secs(2),
    });
    let (stalled, _stalled_rx) = message_handler(1);
    bus.subscribe(TaskTopic::Output, stalled).unwrap();
    let (healthy, mut rx) = message_handler(1024);
    for topic in TaskTopic::ALL {
        bus.subscribe(topic, healthy.clone()).unwrap();
    }

    let executor = shell_executor(&bus, "for i in 1 2 3 4 5 6; do echo $i; done");
    let started = Instant::now();
    executor.start("count").unwrap();
    let events = collect_until_terminal(&mut rx).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(output_lines(&events), vec!["1", "2", "3", "4", "5", "6"]);
    assert!(matches!(events.last(), Some(TaskMessage::Done { .. })));
}

/// Process group whose interrupt is always refused by the OS
struct RefusingGroup;

impl ProcessGroup for RefusingGroup {
    fn configure(&self, command: &mut Command) {
        PosixProcessGroup.configure(command);
    }

    fn interrupt(&self, _child: &mut Child) -> io::Result<()> {
        Err(io::Error::from_raw_os_error(libc::EPERM))
    }

    fn name(&self) -> &'static str {
        "refusing"
    }
}

#[tokio::test]
async fn test_failed_interrupt_escalates_to_kill() {
    let (bus, mut rx) = subscribed_bus();
    let grace = Duration::from_millis(500);
    let executor = TaskExecutor::new(
        bus.clone(),
        ExecutorConfig {
            program: "sh".to_string(),
            base_args: vec!["-c".to_string(), "echo started; exec sleep 30".to_string()],
            cancel_grace: grace,
            drain_timeout: Duration::from_millis(500),
            ..Default::default()
        },
    )
    .with_process_group(Arc::new(RefusingGroup));

    let handle = executor.start("stubborn").unwrap();
    while !matches!(next_event(&mut rx).await, TaskMessage::Output(line) if line.text == "started") {}

    let requested_at = Instant::now();
    assert!(executor.cancel());

    let mut events = Vec::new();
    loop {
        let event = next_event(&mut rx).await;
        let signal_failed = matches!(
            &event,
            TaskMessage::Error(failure) if matches!(failure.error, ProcessError::CancelSignal(_))
        );
        events.push(event);
        if signal_failed {
            break;
        }
    }

    // The process is still owned and reported as running
    assert!(executor.is_running());
    assert_eq!(executor.state(), ExecutorState::Running);
    assert!(matches!(
        &events[0],
        TaskMessage::ErrorOutput(line) if line.text == CANCEL_REQUESTED
    ));
    assert!(!events
        .iter()
        .any(|e| matches!(e, TaskMessage::Output(line) if line.text == CANCEL_SENT)));
    assert!(!events.iter().any(|e| matches!(e, TaskMessage::Command(_))));

    let rest = collect_until_terminal(&mut rx).await;
    assert!(requested_at.elapsed() >= grace);
    let n = rest.len();
    assert!(matches!(&rest[n - 2], TaskMessage::Command(state) if !state.running && state.process.is_none()));
    match &rest[n - 1] {
        TaskMessage::Error(failure) => {
            assert!(failure.cancelled);
            assert_eq!(
                failure.error,
                ProcessError::Terminated {
                    signal: Some(libc::SIGKILL)
                }
            );
        }
        other => panic!("unexpected terminal event {other:?}"),
    }

    assert_eq!(handle.await.unwrap(), ExecutorState::Cancelled);
    assert!(!executor.is_running());
}

#[tokio::test]
async fn test_lingering_grandchild_waits_one_drain_window() {
    let (bus, mut rx) = subscribed_bus();
    let drain = Duration::from_secs(1);
    let executor = TaskExecutor::new(
        bus.clone(),
        ExecutorConfig {
            program: "sh".to_string(),
            base_args: vec!["-c".to_string(), "sleep 30 & echo detached".to_string()],
            drain_timeout: drain,
            ..Default::default()
        },
    );

    let started = Instant::now();
    let state = executor.execute("detach").await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(state, ExecutorState::Completed);
    assert!(elapsed >= drain);
    // Both pipes share one drain deadline
    assert!(elapsed < drain + Duration::from_millis(800));

    let events = collect_until_terminal(&mut rx).await;
    assert_eq!(output_lines(&events), vec!["detached"]);
    assert!(matches!(events.last(), Some(TaskMessage::Done { .. })));

    // The background sleep still holds the group; clean it up
    let pid = events
        .iter()
        .find_map(|e| match e {
            TaskMessage::Command(state) => state.process.as_ref().map(|p| p.pid),
            _ => None,
        })
        .unwrap();
    unsafe {
        libc::kill(-(pid as libc::pid_t), libc::SIGKILL);
    }
}

//! One-shot task listing
//!
//! Runs the task executable once to enumerate the available tasks and
//! publishes exactly one of `ListDone` or `ListError`. Standard error lines are
//! forwarded as they arrive. The listing itself is passed on verbatim.

use crate::process::{LineStream, ProcessRunner};
use std::path::PathBuf;
use tash_core::{OutputLine, ProcessError, Publisher, TaskMessage};

/// Configuration for the task lister
#[derive(Debug, Clone)]
pub struct ListConfig {
    /// Executable that lists tasks.
    pub program: String,
    /// Arguments that make it print the task list.
    pub args: Vec<String>,
    /// Working directory; inherited when `None`.
    pub current_dir: Option<PathBuf>,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            program: "task".to_string(),
            args: vec!["--list-all".to_string(), "--json".to_string()],
            current_dir: None,
        }
    }
}

/// Enumerate tasks, publishing the outcome on `bus`
///
/// The raw listing is also returned to the caller.
pub async fn list_tasks<P>(bus: &P, config: &ListConfig) -> Result<String, ProcessError>
where
    P: Publisher<TaskMessage> + ?Sized,
{
    let result = run_listing(bus, config).await;
    let msg = match &result {
        Ok(listing) => {
            tracing::debug!("task list received ({} bytes)", listing.len());
            TaskMessage::ListDone(listing.clone())
        }
        Err(e) => {
            tracing::warn!("error getting task list: {}", e);
            TaskMessage::ListError(format!("error getting task list: {e}"))
        }
    };
    bus.publish(msg.into_topic_message());
    result
}

async fn run_listing<P>(bus: &P, config: &ListConfig) -> Result<String, ProcessError>
where
    P: Publisher<TaskMessage> + ?Sized,
{
    let runner = ProcessRunner::new(config.program.clone())
        .with_args(config.args.clone())
        .with_current_dir(config.current_dir.clone());
    let mut process = runner.spawn(std::iter::empty::<&str>())?;
    let pid = process.pid();

    let stdout = process.take_stdout();
    let stderr = process.take_stderr();

    let collect = async move {
        let mut listing = String::new();
        if let Some(mut lines) = stdout {
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if !listing.is_empty() {
                            listing.push('\n');
                        }
                        listing.push_str(&line);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!("error reading task list: {}", e);
                        break;
                    }
                }
            }
        }
        listing
    };

    let (listing, (), outcome) = tokio::join!(
        collect,
        forward_errors(bus, stderr, pid),
        process.wait()
    );

    outcome?.into_result()?;
    Ok(listing)
}

async fn forward_errors<P>(bus: &P, stderr: Option<LineStream>, pid: u32)
where
    P: Publisher<TaskMessage> + ?Sized,
{
    let Some(mut lines) = stderr else {
        return;
    };
    while let Ok(Some(line)) = lines.next_line().await {
        let msg = TaskMessage::ErrorOutput(OutputLine::from_process(pid, line));
        bus.publish(msg.into_topic_message());
    }
}

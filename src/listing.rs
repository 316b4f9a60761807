//! Task list parsing
//!
//! The executor hands the runner's `--json` listing over verbatim; this is
//! the consumer-side view of it.

use serde::Deserialize;
use tokio::task::JoinHandle;

/// One task as reported by the task runner
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TaskDescriptor {
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TaskListing {
    #[serde(default)]
    tasks: Vec<TaskDescriptor>,
}

/// Parse a JSON task listing
///
/// An empty listing yields no tasks.
pub fn parse_task_list(json: &str) -> serde_json::Result<Vec<TaskDescriptor>> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let listing: TaskListing = serde_json::from_str(json)?;
    Ok(listing.tasks)
}

/// Render tasks as an aligned two-column table
pub fn format_task_list(tasks: &[TaskDescriptor]) -> String {
    let width = tasks.iter().map(|t| t.name.len()).max().unwrap_or(0);
    let mut out = String::new();
    for task in tasks {
        let mut line = format!("{:width$}  {}", task.name, task.desc);
        if !task.aliases.is_empty() {
            line.push_str(&format!(" (aliases: {})", task.aliases.join(", ")));
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Wait for the stderr printer of a listing run
///
/// Returns false, after logging why, when the printer panicked or was cancelled.
pub async fn join_printer(printer: JoinHandle<()>) -> bool {
    match printer.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!("stderr printer did not complete: {}", e);
            false
        }
    }
}

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tash::{
    format_task_list, init_logging, join_printer, list_tasks, message_handler, parse_task_list,
    CancelHandle, Config, LogFormat, TaskBus, TaskExecutor, TaskMessage, TaskTopic,
};

/// Run Taskfile tasks and stream their output
#[derive(Debug, Parser)]
#[command(
    name = "tash",
    version = concat!(env!("CARGO_PKG_VERSION"), " (built ", env!("BUILD_DATE"), ")"),
    about
)]
struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, env = "TASH_CONFIG")]
    config: Option<PathBuf>,

    /// List available tasks and exit
    #[arg(short, long)]
    list: bool,

    /// Write logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Tasks to run, one after another
    #[arg(value_name = "TASK")]
    tasks: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    if let Err(e) = init_logging(format) {
        eprintln!("tash: failed to initialise logging: {e}");
    }

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("tash: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = load_config(cli.config)?;

    if cli.list {
        return list(&config).await;
    }
    if cli.tasks.is_empty() {
        anyhow::bail!("no tasks given, pass task names or --list");
    }
    run_tasks(&config, cli.tasks).await
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from_file(&path)
            .with_context(|| format!("loading {}", path.display())),
        None => match Config::default_path() {
            Ok(path) => Config::load_or_default(&path)
                .with_context(|| format!("loading {}", path.display())),
            Err(e) => {
                tracing::debug!("{}, using default config", e);
                Ok(Config::default())
            }
        },
    }
}

async fn list(config: &Config) -> anyhow::Result<bool> {
    let bus = TaskBus::with_config(config.bus_config());
    let (handler, mut rx) = message_handler(config.bus.handler_capacity);
    let topic = TaskTopic::OutputErr.topic();
    let key = bus.subscribe(topic.clone(), handler)?;

    let printer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let TaskMessage::ErrorOutput(line) = msg.message {
                eprintln!("{}", line.text);
            }
        }
    });

    let result = list_tasks(&bus, &config.list_config()).await;
    bus.unsubscribe(&topic, key);
    join_printer(printer).await;

    let json = match result {
        Ok(json) => json,
        Err(e) => {
            eprintln!("tash: error getting task list: {e}");
            return Ok(false);
        }
    };
    let tasks = parse_task_list(&json).context("task list is not valid JSON")?;
    print!("{}", format_task_list(&tasks));
    Ok(true)
}

/// Run `tasks` in order, stopping at the first failure
async fn run_tasks(config: &Config, tasks: Vec<String>) -> anyhow::Result<bool> {
    let bus = TaskBus::with_config(config.bus_config());
    let (handler, mut rx) = message_handler(config.bus.handler_capacity);
    for topic in TaskTopic::ALL {
        bus.subscribe(topic, handler.clone())?;
    }
    drop(handler);

    let executor = TaskExecutor::new(bus.clone(), config.executor_config());
    let mut queue = tasks.into_iter();
    if let Some(first) = queue.next() {
        executor.start(first)?;
    }

    let mut cancel: Option<CancelHandle> = None;
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    return Ok(false);
                };
                let terminal = msg.message.is_terminal();
                match msg.message {
                    TaskMessage::Output(line) => println!("{}", line.text),
                    TaskMessage::ErrorOutput(line) => eprintln!("{}", line.text),
                    TaskMessage::Command(state) => cancel = state.cancel,
                    TaskMessage::Done { task } => {
                        tracing::debug!("task {} done", task);
                        match queue.next() {
                            Some(next) => {
                                executor.start(next)?;
                            }
                            None => return Ok(true),
                        }
                    }
                    TaskMessage::Error(failure) => {
                        eprintln!("tash: {failure}");
                        if terminal {
                            let skipped: Vec<String> = queue.by_ref().collect();
                            if !skipped.is_empty() {
                                eprintln!("tash: skipped {}", skipped.join(", "));
                            }
                            return Ok(false);
                        }
                    }
                    TaskMessage::ListDone(_) | TaskMessage::ListError(_) => {}
                }
            }

            signal = tokio::signal::ctrl_c() => {
                signal.context("listening for Ctrl-C")?;
                match &cancel {
                    Some(handle) if handle.is_cancelled() => {
                        eprintln!("tash: interrupted again, exiting");
                        return Ok(false);
                    }
                    Some(handle) => handle.cancel(),
                    None => {
                        executor.cancel();
                    }
                }
            }
        }
    }
}

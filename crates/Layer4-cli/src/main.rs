//! SysRow CLI - Main entry point

mod commands;
mod schedule;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use sysrow_foundation::SysrowConfig;
use sysrow_task::{TaskManager, TaskPriority};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// SysRow - background task manager for the terminal
#[derive(Parser, Debug)]
#[command(name = "sysrow")]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Data directory (default: $SYSROW_HOME or ~/.sysrow)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a task to the queue
    Queue {
        /// Task priority (low, normal, high)
        #[arg(short, long, default_value = "normal")]
        priority: TaskPriority,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Schedule a task for later execution
    Delay {
        /// Run at a local wall-clock time (HH:MM)
        #[arg(long, conflicts_with = "after", required_unless_present = "after")]
        at: Option<String>,

        /// Run after a delay (30s, 5m, 2h, 1d)
        #[arg(long)]
        after: Option<String>,

        /// Task priority (low, normal, high)
        #[arg(short, long, default_value = "normal")]
        priority: TaskPriority,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Run a command immediately
    Run {
        /// Run in the background
        #[arg(long)]
        bg: bool,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Run the next due task from the queue
    Next {
        /// Run in the background
        #[arg(long)]
        bg: bool,
    },
    /// Run a queued task by ID
    Start {
        /// Run in the background
        #[arg(long)]
        bg: bool,

        /// Task ID
        id: String,
    },
    /// Manage task groups
    Group {
        #[command(subcommand)]
        command: GroupCommand,
    },
    /// List all tasks
    List,
    /// Show a task's status
    Status {
        /// Task ID
        id: String,
    },
    /// Show a task's output and log
    Logs {
        /// Task ID
        id: String,
    },
    /// Cancel a pending or running task
    Cancel {
        /// Task ID
        id: String,
    },
    /// Delete finished tasks and their logs
    Cleanup {
        /// Minimum age (30s, 5m, 2h, 1d); defaults to the configured retention
        #[arg(long)]
        older_than: Option<String>,
    },
    /// Supervise a task in a detached process
    #[command(hide = true)]
    Supervise {
        /// Task ID
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    /// Create an empty group
    Create {
        name: String,
    },
    /// Add a command to a group
    Add {
        name: String,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Run every task of a group in order
    Run {
        /// Run members in the background
        #[arg(long)]
        bg: bool,

        name: String,
    },
    /// Delete a group (its tasks are kept)
    Delete {
        name: String,
    },
    /// List groups
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(failure_code(&e))
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = SysrowConfig::load(args.data_dir.as_deref())?;
    let manager = TaskManager::open(config)?;
    commands::dispatch(&manager, args.command).await
}

/// 2 when the request itself was wrong (unknown id, illegal transition),
/// 1 for failures of the environment
fn failure_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<sysrow_foundation::Error>() {
        Some(e) if e.is_user_facing() => 2,
        _ => 1,
    }
}

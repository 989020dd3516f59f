//! Command handlers - thin wrappers over `TaskManager`

use crate::schedule;
use crate::{Command, GroupCommand};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use std::process::Stdio;
use std::time::{Duration, Instant};
use sysrow_foundation::Listing;
use sysrow_task::{MemberOutcome, RunHandle, Task, TaskId, TaskManager, TaskStatus};
use tracing::debug;

/// How long a detached start waits to see the task leave Pending
const DETACH_WAIT: Duration = Duration::from_secs(3);

pub async fn dispatch(manager: &TaskManager, command: Command) -> Result<()> {
    match command {
        Command::Queue { priority, command } => {
            let task = manager.queue_task(&command.join(" "), priority)?;
            println!("Queued task {} ({} priority)", task.id, task.priority);
        }
        Command::Delay {
            at,
            after,
            priority,
            command,
        } => {
            let when = match (at, after) {
                (Some(at), _) => schedule::next_clock_time(&at, Local::now())?,
                (None, Some(after)) => schedule::after(&after, Utc::now())?,
                (None, None) => bail!("either --at or --after is required"),
            };
            let task = manager.delay_task(&command.join(" "), priority, when)?;
            println!("Scheduled task {} for {}", task.id, format_time(when));
        }
        Command::Run { bg, command } => {
            let task = manager.queue_task(&command.join(" "), Default::default())?;
            execute(manager, task.id, bg).await?;
        }
        Command::Next { bg } => match manager.queue()?.get_next_due(Utc::now()) {
            Some(task) => execute(manager, task.id, bg).await?,
            None => println!("No due tasks in the queue"),
        },
        Command::Start { bg, id } => execute(manager, parse_id(&id)?, bg).await?,
        Command::Group { command } => group(manager, command).await?,
        Command::List => list(manager)?,
        Command::Status { id } => {
            let task = manager.status(&parse_id(&id)?)?;
            print_status(&task);
        }
        Command::Logs { id } => {
            let logs = manager.logs(&parse_id(&id)?)?;
            print_section("stdout", &logs.stdout);
            print_section("stderr", &logs.stderr);
            print_section("log", &logs.app);
        }
        Command::Cancel { id } => {
            let task = manager.cancel(&parse_id(&id)?).await?;
            println!("Cancelled task {}", task.id);
        }
        Command::Cleanup { older_than } => {
            let removed = match older_than {
                Some(age) => manager.cleanup(schedule::parse_duration(&age)?)?,
                None => manager.cleanup_expired()?,
            };
            println!("Removed {} task(s)", removed.len());
        }
        Command::Supervise { id } => {
            let started = manager.run_task(&parse_id(&id)?, false).await?;
            debug!(task_id = %started.task.id, status = %started.task.status, "supervised task finished");
        }
    }
    Ok(())
}

// ============================================================================
// Execution
// ============================================================================

/// Run a stored task. Background runs are handed to a detached
/// `sysrow supervise` process so they outlive this invocation.
async fn execute(manager: &TaskManager, id: TaskId, background: bool) -> Result<()> {
    if background {
        let task = detach(manager, id).await?;
        match task.pid {
            Some(pid) => println!("Started task {} in the background (PID {})", task.id, pid),
            None => println!("Started task {} in the background ({})", task.id, task.status),
        }
        return Ok(());
    }

    // Supervised on a tokio task so Ctrl-C can terminate the child cleanly.
    let started = manager.run_task(&id, true).await?;
    let handle = started
        .handle
        .context("background run returned no handle")?;
    let task = wait_interruptible(manager, handle).await?;
    print_finished(&task);
    Ok(())
}

async fn wait_interruptible(manager: &TaskManager, handle: RunHandle) -> Result<Task> {
    let id = handle.task_id();
    let wait = handle.wait();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(wait, ctrl_c);

    tokio::select! {
        task = &mut wait => return Ok(task?),
        _ = &mut ctrl_c => {}
    }

    eprintln!("Interrupted, cancelling task {}", id.short());
    manager.runner().terminate(&id).await;
    Ok(wait.await?)
}

/// Spawn `sysrow supervise <id>` detached and wait until it picks the task up
async fn detach(manager: &TaskManager, id: TaskId) -> Result<Task> {
    let task = manager.status(&id)?;
    if task.status != TaskStatus::Pending {
        bail!("task {} is {}, only pending tasks can be run", id, task.status);
    }

    let exe = std::env::current_exe().context("cannot locate the sysrow executable")?;
    let mut command = std::process::Command::new(exe);
    command
        .arg("--data-dir")
        .arg(manager.layout().root())
        .arg("supervise")
        .arg(id.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    let child = command.spawn().context("failed to start supervisor process")?;
    debug!(task_id = %id, supervisor_pid = child.id(), "detached supervisor");

    let deadline = Instant::now() + DETACH_WAIT;
    loop {
        let task = manager.status(&id)?;
        if task.status != TaskStatus::Pending || Instant::now() >= deadline {
            return Ok(task);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ============================================================================
// Groups
// ============================================================================

async fn group(manager: &TaskManager, command: GroupCommand) -> Result<()> {
    let groups = manager.groups();
    match command {
        GroupCommand::Create { name } => {
            let group = groups.create_group(&name)?;
            println!("Created group '{}' ({})", group.name, group.id);
        }
        GroupCommand::Add { name, command } => {
            let task = groups.add_task(&name, &command.join(" "))?;
            println!("Added task {} to group '{}'", task.id, name);
        }
        GroupCommand::Run { bg: true, name } => {
            let group = groups.get_group_by_name(&name)?;
            for id in &group.task_ids {
                match detach(manager, *id).await {
                    Ok(task) => println!("  {} {} {}", task.status.symbol(), task.id.short(), task.command),
                    Err(e) => println!("  - {} skipped: {}", id.short(), e),
                }
            }
        }
        GroupCommand::Run { bg: false, name } => {
            let run = manager.run_group(&name, false).await?;
            for member in &run.members {
                match &member.outcome {
                    MemberOutcome::Finished(task) => print_finished(task),
                    MemberOutcome::Detached(handle) => {
                        println!("  {} running in the background", handle.task_id().short())
                    }
                    MemberOutcome::Failed(reason) => {
                        println!("  ✗ {} failed: {}", member.task_id.short(), reason)
                    }
                    MemberOutcome::Skipped(reason) => {
                        println!("  - {} skipped: {}", member.task_id.short(), reason)
                    }
                }
            }
        }
        GroupCommand::Delete { name } => {
            let group = groups.delete_group(&name)?;
            println!(
                "Deleted group '{}' ({} task(s) kept)",
                group.name,
                group.task_ids.len()
            );
        }
        GroupCommand::List => {
            let listing = manager.list_groups()?;
            if listing.items.is_empty() {
                println!("No groups found.");
            }
            for group in &listing.items {
                println!("{:<20} {} task(s)", group.name, group.task_ids.len());
            }
            report_skipped(&listing);
        }
    }
    Ok(())
}

// ============================================================================
// Output
// ============================================================================

fn list(manager: &TaskManager) -> Result<()> {
    let listing = manager.list()?;
    if listing.items.is_empty() {
        println!("No tasks found.");
        report_skipped(&listing);
        return Ok(());
    }

    println!(
        "{:<10} {:<12} {:<8} {:<20} {}",
        "ID", "Status", "Priority", "Created", "Command"
    );
    println!("{}", "-".repeat(80));
    for task in &listing.items {
        println!(
            "{:<10} {} {:<10} {:<8} {:<20} {}",
            task.id.short(),
            task.status.symbol(),
            task.status.as_str(),
            task.priority.as_str(),
            format_time(task.created_at),
            truncate(&task.command, 40)
        );
    }
    report_skipped(&listing);
    Ok(())
}

fn print_status(task: &Task) {
    println!("Task:      {}", task.id);
    println!("Command:   {}", task.command);
    println!("Status:    {} {}", task.status.symbol(), task.status);
    println!("Priority:  {}", task.priority);
    println!("Created:   {}", format_time(task.created_at));
    if let Some(at) = task.scheduled_at {
        println!("Scheduled: {}", format_time(at));
    }
    if let Some(at) = task.started_at {
        println!("Started:   {}", format_time(at));
    }
    if let Some(at) = task.finished_at {
        println!("Finished:  {}", format_time(at));
    }
    if let Some(duration) = task.duration() {
        println!("Duration:  {:.1}s", duration.as_secs_f64());
    }
    if let Some(code) = task.exit_code {
        println!("Exit code: {}", code);
    }
    if let Some(pid) = task.pid {
        println!("PID:       {}", pid);
    }
    if let Some(group) = task.group_id {
        println!("Group:     {}", group);
    }
}

fn print_finished(task: &Task) {
    match task.exit_code {
        Some(code) => println!(
            "  {} {} {} (exit code {})",
            task.status.symbol(),
            task.id.short(),
            task.status,
            code
        ),
        None => println!("  {} {} {}", task.status.symbol(), task.id.short(), task.status),
    }
}

fn print_section(title: &str, content: &str) {
    println!("=== {} ===", title);
    if content.is_empty() {
        println!("(empty)");
    } else {
        print!("{}", content);
        if !content.ends_with('\n') {
            println!();
        }
    }
}

fn report_skipped<T>(listing: &Listing<T>) {
    if listing.is_clean() {
        return;
    }
    eprintln!(
        "warning: skipped {} unreadable record(s)",
        listing.skipped.len()
    );
    for skipped in &listing.skipped {
        eprintln!("  {}: {}", skipped.key, skipped.reason);
    }
}

fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn parse_id(input: &str) -> Result<TaskId> {
    Ok(input.parse::<TaskId>()?)
}

/// Truncate a string for display
fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
